use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{arg, command, value_parser, ArgAction, Command};
use reqtuner::execute::{convert_capture_files, convert_directory, list_requests, send_request, PatchMode};
use reqtuner::http_request::{Body, StringMap};
use reqtuner::http_request_executor::{ExecutionContext, RequestPatch};

fn parse_key_value(raw: &str) -> Result<(String, String)> {
    return raw
        .split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{}'", raw));
}

fn parse_body(raw: &str) -> Body {
    return match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Body::Map(map),
        _ => Body::Text(raw.to_string()),
    };
}

fn key_values(matches: &clap::ArgMatches, id: &str) -> Option<StringMap> {
    return matches
        .get_many::<(String, String)>(id)
        .map(|pairs| pairs.cloned().collect());
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cmd = Command::new("reqtuner")
        .author(clap::crate_authors!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            command!("convert")
                .about("convert captured http transactions into request scripts")
                .arg(
                    arg!([FILES] "files")
                        .help("capture files, every *.txt in the current directory when omitted")
                        .value_parser(value_parser!(PathBuf))
                        .action(ArgAction::Append),
                )
                .arg(
                    arg!(-o --output <OUTPUT>)
                        .help("script to write, only for a single capture file")
                        .value_parser(value_parser!(PathBuf))
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            command!("list")
                .about("list the request scripts of a directory")
                .arg(
                    arg!(<DIR> "directory")
                        .help("directory searched recursively for request scripts")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            command!("send")
                .about("send a request script, optionally with overrides")
                .arg(
                    arg!(<DIR> "directory")
                        .help("directory searched recursively for request scripts")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(arg!(<NAME> "name").help("script file name without extension"))
                .arg(
                    arg!(-p --param <PARAM>)
                        .help("query parameter KEY=VALUE - you can specify this argument multiple times")
                        .value_parser(parse_key_value)
                        .action(ArgAction::Append),
                )
                .arg(
                    arg!(-H --header <HEADER>)
                        .help("header KEY=VALUE - you can specify this argument multiple times")
                        .value_parser(parse_key_value)
                        .action(ArgAction::Append),
                )
                .arg(
                    arg!(-b --body <BODY>)
                        .help("payload, a json object is merged into map bodies")
                        .action(ArgAction::Set),
                )
                .arg(
                    arg!(--replace)
                        .help("use the overrides instead of merging them into the stored values")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    arg!(--timeout <SECONDS>)
                        .help("transport timeout")
                        .value_parser(value_parser!(u64))
                        .action(ArgAction::Set),
                ),
        );

    let matches = cmd.get_matches();
    let result = match matches.subcommand() {
        Some(("convert", matches)) => match matches.get_many::<PathBuf>("FILES") {
            Some(files) => convert_capture_files(files.collect(), matches.get_one::<PathBuf>("output")),
            None => convert_directory(&std::env::current_dir()?),
        },
        Some(("list", matches)) => list_requests(matches.get_one::<PathBuf>("DIR").unwrap()),
        Some(("send", matches)) => {
            let patch = RequestPatch {
                params: key_values(matches, "param"),
                headers: key_values(matches, "header"),
                payload: matches.get_one::<String>("body").map(|raw| parse_body(raw)),
            };
            let mode = if matches.get_flag("replace") { PatchMode::Replace } else { PatchMode::Update };
            let timeout = matches.get_one::<u64>("timeout").map(|secs| Duration::from_secs(*secs));
            let context = ExecutionContext::new(timeout)?;
            send_request(
                matches.get_one::<PathBuf>("DIR").unwrap(),
                matches.get_one::<String>("NAME").unwrap(),
                patch,
                mode,
                &context,
            )
        }
        _ => unreachable!("this should've been prevented"),
    };
    return result;
}
