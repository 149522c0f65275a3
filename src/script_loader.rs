//! Loading of `.rhai` request scripts.
//!
//! A script binds `url`, optionally `params`, `headers` and `payload` (or `data`), and ends with
//! a line like `let response = requests.post(url, #{ headers: headers, data: payload });`.
//! The bindings are obtained by evaluating the script in a sandboxed engine where `requests` is
//! an inert stub, the verb is taken from the source text without evaluating anything.

use std::fs;
use std::path::Path;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;

use crate::errors::{Result, TunerError};
use crate::http_request::{Body, HttpMethod, RequestDefinition, StringMap};

pub const SCRIPT_EXTENSION: &str = "rhai";

/// Identifier the scripts use for the http client.
pub const HTTP_CLIENT_IDENT: &str = "requests";

const MAX_OPERATIONS: u64 = 100_000;

static RESPONSE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:let[ \t]+)?response[ \t]*=[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*\.[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*\(")
        .unwrap()
});

/// Stand-in for the http client while a script is evaluated, every call returns `()`.
#[derive(Debug, Clone, Copy)]
struct HttpClientStub;

/// Finds the verb of the first `response = requests.<verb>(...)` assignment.
///
/// Falls back to `GET` when there is no such line, when the receiver is not the http client or
/// when the verb is not supported.
pub fn detect_method(source: &str) -> HttpMethod {
    for captures in RESPONSE_CALL.captures_iter(source) {
        if &captures[1] != HTTP_CLIENT_IDENT {
            continue;
        }
        if let Some(method) = HttpMethod::from_verb(&captures[2]) {
            return method;
        }
    }
    debug!("no '{}' call assigned to response, defaulting to GET", HTTP_CLIENT_IDENT);
    return HttpMethod::Get;
}

pub struct ScriptEngine {
    engine: Engine,
}

impl ScriptEngine {
    pub fn new() -> ScriptEngine {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_expr_depths(64, 32);
        engine.on_print(|text| debug!("script: {}", text));
        engine.register_type_with_name::<HttpClientStub>("HttpClient");
        for method in HttpMethod::ALL {
            for verb in [method.as_str().to_lowercase(), method.as_str().to_string()] {
                engine.register_fn(verb.as_str(), |_: HttpClientStub, _: Dynamic| ());
                engine.register_fn(verb.as_str(), |_: HttpClientStub, _: Dynamic, _: Dynamic| ());
                engine.register_fn(verb.as_str(), |_: HttpClientStub, _: Dynamic, _: Dynamic, _: Dynamic| ());
                engine.register_fn(
                    verb.as_str(),
                    |_: HttpClientStub, _: Dynamic, _: Dynamic, _: Dynamic, _: Dynamic| (),
                );
            }
        }
        return ScriptEngine { engine };
    }

    pub fn load(&self, path: &Path) -> Result<RequestDefinition> {
        let source = fs::read_to_string(path).map_err(|e| TunerError::script_load(path, e))?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .ok_or_else(|| TunerError::script_load(path, "no file name"))?;
        let mut definition = self.evaluate(&name, &source).map_err(|reason| TunerError::script_load(path, reason))?;
        definition.source = Some(path.to_path_buf());
        debug!("loaded {} ({} {}) from {}", definition.name, definition.method, definition.url, path.display());
        return Ok(definition);
    }

    /// Evaluates `source` and builds the definition from its global bindings.
    pub fn evaluate(&self, name: &str, source: &str) -> std::result::Result<RequestDefinition, String> {
        let ast = self.engine.compile(source).map_err(|e| e.to_string())?;
        let mut scope = Scope::new();
        scope.push(HTTP_CLIENT_IDENT, HttpClientStub);
        self.engine.run_ast_with_scope(&mut scope, &ast).map_err(|e| e.to_string())?;

        let url = match scope.get_value::<Dynamic>("url") {
            None => return Err("missing required binding 'url'".to_string()),
            Some(value) => value.into_string().map_err(|t| format!("'url' must be a string, found {}", t))?,
        };
        let url = url.parse::<reqwest::Url>().map_err(|e| format!("{:?} @ '{}'", e, url))?;

        let params = string_map(&scope, "params")?;
        let headers = string_map(&scope, "headers")?;
        let body = match binding(&scope, "payload")? {
            Value::Null => Body::from_value(binding(&scope, "data")?),
            payload => Body::from_value(payload),
        };

        let mut definition = RequestDefinition::new(name, detect_method(source), url)
            .with_params(params)
            .with_headers(headers);
        definition.body = body;
        return Ok(definition);
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        ScriptEngine::new()
    }
}

fn binding(scope: &Scope, name: &str) -> std::result::Result<Value, String> {
    return match scope.get_value::<Dynamic>(name) {
        None => Ok(Value::Null),
        Some(value) => rhai::serde::from_dynamic::<Value>(&value).map_err(|e| format!("'{}': {}", name, e)),
    };
}

fn string_map(scope: &Scope, name: &str) -> std::result::Result<StringMap, String> {
    return match binding(scope, name)? {
        Value::Null => Ok(StringMap::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(text) => Some((key, text)),
                other => Some((key, other.to_string())),
            })
            .collect()),
        other => Err(format!("'{}' must be an object map, found {}", name, other)),
    };
}
