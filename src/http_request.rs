use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde_json::{Map, Value};

pub type StringMap = BTreeMap<String, String>;

/// The verbs a request script may use. Anything else is treated as `Get`.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
    ];

    /// Case-insensitive lookup of a verb name.
    pub fn from_verb(verb: &str) -> Option<HttpMethod> {
        return match verb.to_lowercase().as_str() {
            "get" => Some(HttpMethod::Get),
            "post" => Some(HttpMethod::Post),
            "put" => Some(HttpMethod::Put),
            "delete" => Some(HttpMethod::Delete),
            "patch" => Some(HttpMethod::Patch),
            _ => None,
        };
    }

    pub fn as_str(&self) -> &'static str {
        return match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        };
    }

    /// GET requests only ever carry params and headers.
    pub fn carries_body(&self) -> bool {
        return *self != HttpMethod::Get;
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        return match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };
    }
}

/// Payload of a request definition, shaped by how the script assigned it.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Map(Map<String, Value>),
    Text(String),
}

impl Body {
    /// Builds a body from a json value: objects become maps, strings stay text,
    /// null means no body and any other scalar is kept as its json text.
    pub fn from_value(value: Value) -> Option<Body> {
        return match value {
            Value::Null => None,
            Value::Object(map) => Some(Body::Map(map)),
            Value::String(text) => Some(Body::Text(text)),
            other => Some(Body::Text(other.to_string())),
        };
    }
}

impl From<Map<String, Value>> for Body {
    fn from(map: Map<String, Value>) -> Self {
        Body::Map(map)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

/// One declarative request, as loaded from a script.
///
/// `url`, `method`, `params` and `headers` never change after loading. The body is the only
/// state `update` writes to: merging a map into a map body keeps the merged keys for every
/// later call. Clone the definition to get an independent copy.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDefinition {
    pub(crate) name: String,
    pub(crate) source: Option<PathBuf>,
    pub(crate) url: reqwest::Url,
    pub(crate) method: HttpMethod,
    pub(crate) params: StringMap,
    pub(crate) headers: StringMap,
    pub(crate) body: Option<Body>,
}

impl RequestDefinition {
    pub fn new(name: &str, method: HttpMethod, url: reqwest::Url) -> RequestDefinition {
        return RequestDefinition {
            name: name.to_string(),
            source: None,
            url,
            method,
            params: StringMap::new(),
            headers: StringMap::new(),
            body: None,
        };
    }

    pub fn with_params(mut self, params: StringMap) -> RequestDefinition {
        self.params = params;
        self
    }

    pub fn with_headers(mut self, headers: StringMap) -> RequestDefinition {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> RequestDefinition {
        self.body = Some(body.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&PathBuf> {
        self.source.as_ref()
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn params(&self) -> &StringMap {
        &self.params
    }

    pub fn headers(&self) -> &StringMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }
}
