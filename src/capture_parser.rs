use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_json::{Map, Value};

use crate::errors::{Result, TunerError};
use crate::http_request::{HttpMethod, StringMap};
use crate::script_loader::{HTTP_CLIENT_IDENT, SCRIPT_EXTENSION};

const COOKIE_MARKER: &str = "Cookie: ";
const HEADER_SEPARATOR: &str = ": ";
const NULL_VALUE: &str = "null";

/// A captured transaction as far as the request is concerned.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CaptureRecord {
    pub method: String,
    pub target_url: String,
    pub headers: StringMap,
    pub cookies: StringMap,
    pub body_raw: Option<String>,
}

// Represents state as determined by the latest parsed line
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ParseState {
    RequestLine,
    Header,
    AfterHeaders,
}

// Determined type of line inside the header block
#[derive(Debug, Eq, PartialEq)]
enum LineType {
    Cookie,
    Header,
    Empty,
    Unknown,
}

fn get_line_type(line: &str) -> LineType {
    return if line.is_empty() {
        LineType::Empty
    } else if line.contains(COOKIE_MARKER) {
        LineType::Cookie
    } else if line.contains(HEADER_SEPARATOR) {
        LineType::Header
    } else {
        LineType::Unknown
    };
}

fn parse_cookies(line: &str) -> StringMap {
    let value = line.split_once(COOKIE_MARKER).map(|(_, value)| value).unwrap_or_default();
    return value
        .split("; ")
        .filter_map(|entry| entry.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
}

/// Reads the capture up to the second consecutive blank line.
fn read_capture(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|reason| TunerError::input_format(path, format!("couldn't open: {}", reason)))?;
    let mut lines = Vec::new();
    let mut previous_blank = false;
    for result_line in BufReader::new(file).lines() {
        let line = result_line.map_err(|reason| TunerError::input_format(path, reason))?;
        let line = line.trim_end_matches('\r').to_string();
        let blank = line.is_empty();
        if previous_blank && blank {
            break;
        }
        previous_blank = blank;
        lines.push(line);
    }
    return Ok(lines);
}

/// Parses the lines of one captured transaction.
pub fn parse_capture_lines(path: &Path, lines: &[String]) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::default();
    let mut parse_state = ParseState::RequestLine;

    for line in lines {
        match parse_state {
            ParseState::RequestLine => {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() < 2 {
                    return Err(TunerError::input_format(path, format!("request line '{}' lacks method and url", line)));
                }
                record.method = tokens[0].to_string();
                record.target_url = tokens[1].to_string();
                parse_state = ParseState::Header;
            }
            ParseState::Header => match get_line_type(line) {
                LineType::Header => {
                    if let Some((name, value)) = line.split_once(HEADER_SEPARATOR) {
                        record.headers.insert(name.to_string(), value.to_string());
                    }
                }
                LineType::Cookie => {
                    record.cookies = parse_cookies(line);
                    parse_state = ParseState::AfterHeaders;
                }
                LineType::Empty | LineType::Unknown => parse_state = ParseState::AfterHeaders,
            },
            ParseState::AfterHeaders => break,
        }
    }
    if parse_state == ParseState::RequestLine {
        return Err(TunerError::input_format(path, "empty capture"));
    }

    // the body sits between a blank line and the response status line
    record.body_raw = lines
        .windows(3)
        .skip(1)
        .find(|window| window[0].is_empty() && window[2].contains("HTTP"))
        .map(|window| window[1].clone());
    return Ok(record);
}

pub fn parse_capture(path: &Path) -> Result<CaptureRecord> {
    let lines = read_capture(path)?;
    return parse_capture_lines(path, &lines);
}

impl CaptureRecord {
    /// Decodes the `key=value&key=value` body. Any pair without `=` means there is no usable body.
    /// A value that is exactly `null` becomes json null, `:null` inside a value is already json
    /// and is kept as text.
    pub fn decoded_body(&self) -> Option<Map<String, Value>> {
        let raw = self.body_raw.as_deref()?;
        let mut body = Map::new();
        for pair in raw.split('&') {
            let (key, value) = match pair.split_once('=') {
                Some(pair) => pair,
                None => {
                    debug!("body '{}' is not form encoded, ignoring it", raw);
                    return None;
                }
            };
            let value = if value == NULL_VALUE { Value::Null } else { Value::String(value.to_string()) };
            body.insert(key.to_string(), value);
        }
        return Some(body);
    }

    pub fn is_get(&self) -> bool {
        return self.method.contains("GET");
    }

    /// Verb of the emitted call: GET for GET captures, the captured verb when supported, else POST.
    pub fn script_method(&self) -> HttpMethod {
        if self.is_get() {
            return HttpMethod::Get;
        }
        return match HttpMethod::from_verb(&self.method) {
            Some(HttpMethod::Get) | None => HttpMethod::Post,
            Some(method) => method,
        };
    }

    pub fn to_script(&self, source_name: &str) -> String {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("content-length"))
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        let verb = self.script_method().as_str().to_lowercase();

        let mut script = format!("// Converted from {}\n", source_name);
        script += &format!("let url = {};\n\n", rhai_string(&self.target_url));
        script += &format!("let headers = {};\n\n", rhai_map(&headers, 0));
        if self.is_get() {
            script += &format!("let response = {}.{}(url, #{{ headers: headers }});\n", HTTP_CLIENT_IDENT, verb);
        } else {
            // json text, replayed byte for byte whatever the content type
            let payload = match self.decoded_body() {
                Some(body) => rhai_string(&Value::Object(body).to_string()),
                None => "()".to_string(),
            };
            script += &format!("let payload = {};\n\n", payload);
            script += &format!(
                "let response = {}.{}(url, #{{ headers: headers, data: payload }});\n",
                HTTP_CLIENT_IDENT, verb
            );
        }
        return script;
    }
}

fn rhai_string(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if c.is_control() => quoted.push_str(&format!("\\u{:04x}", c as u32)),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    return quoted;
}

fn rhai_map(map: &Map<String, Value>, depth: usize) -> String {
    if map.is_empty() {
        return "#{}".to_string();
    }
    let indent = "    ".repeat(depth + 1);
    let entries: Vec<String> = map
        .iter()
        .map(|(key, value)| format!("{}{}: {}", indent, rhai_string(key), rhai_literal(value, depth + 1)))
        .collect();
    return format!("#{{\n{}\n{}}}", entries.join(",\n"), "    ".repeat(depth));
}

fn rhai_literal(value: &Value, depth: usize) -> String {
    return match value {
        Value::Null => "()".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => rhai_string(text),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(|item| rhai_literal(item, depth)).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => rhai_map(map, depth),
    };
}

/// `login.txt` becomes `login.rhai` next to it.
pub fn default_output_path(input: &Path) -> PathBuf {
    return input.with_extension(SCRIPT_EXTENSION);
}

/// Converts the capture at `input` into a request script written to `output`.
pub fn convert_capture(input: &Path, output: &Path) -> Result<CaptureRecord> {
    let record = parse_capture(input)?;
    if !record.cookies.is_empty() {
        debug!("{}: cookies {:?} are not carried into the script", input.display(), record.cookies);
    }
    let source_name = input.file_name().map(|name| name.to_string_lossy().to_string()).unwrap_or_default();
    fs::write(output, record.to_script(&source_name))
        .map_err(|source| TunerError::Output { path: output.to_path_buf(), source })?;
    info!("converted {} to {}", input.display(), output.display());
    return Ok(record);
}
