use std::time::Duration;

use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};

use crate::errors::{Result, TunerError};
use crate::http_request::{Body, HttpMethod, RequestDefinition, StringMap};

const JSON_CONTENT_TYPE: &str = "application/json";

pub struct ExecutionContext {
    pub client: reqwest::blocking::Client,
}

impl ExecutionContext {
    /// `timeout` is handed to the client as is, `None` means the client never times out.
    pub fn new(timeout: Option<Duration>) -> Result<ExecutionContext> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        return Ok(ExecutionContext { client });
    }

    pub fn with_client(client: reqwest::blocking::Client) -> ExecutionContext {
        return ExecutionContext { client };
    }
}

/// Overrides for a single `update` or `replace` call. Unset fields keep the stored value.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RequestPatch {
    pub params: Option<StringMap>,
    pub headers: Option<StringMap>,
    pub payload: Option<Body>,
}

impl RequestPatch {
    pub fn new() -> RequestPatch {
        RequestPatch::default()
    }

    pub fn with_params(mut self, params: StringMap) -> RequestPatch {
        self.params = Some(params);
        self
    }

    pub fn with_param(mut self, name: &str, value: &str) -> RequestPatch {
        self.params.get_or_insert_with(StringMap::new).insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_headers(mut self, headers: StringMap) -> RequestPatch {
        self.headers = Some(headers);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> RequestPatch {
        self.headers.get_or_insert_with(StringMap::new).insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Body>) -> RequestPatch {
        self.payload = Some(payload.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        return self.params.is_none() && self.headers.is_none() && self.payload.is_none();
    }
}

/// Body in the form it goes over the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedPayload {
    Json(String),
    Form(Vec<(String, String)>),
    Raw(String),
}

/// The effective request of one `send`, `update` or `replace` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: reqwest::Url,
    pub params: StringMap,
    pub headers: StringMap,
    pub payload: Option<EncodedPayload>,
}

// the last matching entry wins, as in `PreparedRequest::header_map`
fn is_json(headers: &StringMap) -> bool {
    return headers
        .iter()
        .rev()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.trim() == JSON_CONTENT_TYPE)
        .unwrap_or(false);
}

/// Header names are case-insensitive: an override drops every stored spelling of its name.
fn overlay_headers(headers: &mut StringMap, overrides: StringMap) {
    for (name, value) in overrides {
        headers.retain(|stored, _| !stored.eq_ignore_ascii_case(&name));
        headers.insert(name, value);
    }
}

fn form_pairs(map: Map<String, Value>) -> Vec<(String, String)> {
    return map
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(text) => Some((key, text)),
            other => Some((key, other.to_string())),
        })
        .collect();
}

/// Chooses the wire encoding of `body`: json text for maps sent as `application/json`, form
/// pairs for other maps and the string itself for text bodies. GET never carries a body.
pub fn encode_payload(method: HttpMethod, headers: &StringMap, body: Option<Body>) -> Option<EncodedPayload> {
    if !method.carries_body() {
        return None;
    }
    return match body? {
        Body::Text(text) => Some(EncodedPayload::Raw(text)),
        Body::Map(map) if map.is_empty() => None,
        Body::Map(map) if is_json(headers) => Some(EncodedPayload::Json(Value::Object(map).to_string())),
        Body::Map(map) => Some(EncodedPayload::Form(form_pairs(map))),
    };
}

impl RequestDefinition {
    fn prepare(&self, params: StringMap, headers: StringMap, body: Option<Body>) -> PreparedRequest {
        let payload = encode_payload(self.method, &headers, body);
        return PreparedRequest { method: self.method, url: self.url.clone(), params, headers, payload };
    }

    pub fn prepare_send(&self) -> PreparedRequest {
        return self.prepare(self.params.clone(), self.headers.clone(), self.body.clone());
    }

    /// Overlays the patch on the stored values. A map payload merged into a stored map body is
    /// written back, so it stays merged for later calls. GET definitions never send a body and
    /// keep theirs untouched.
    pub fn prepare_update(&mut self, patch: RequestPatch) -> PreparedRequest {
        let mut params = self.params.clone();
        params.extend(patch.params.unwrap_or_default());
        let mut headers = self.headers.clone();
        overlay_headers(&mut headers, patch.headers.unwrap_or_default());

        let body = match patch.payload {
            None => self.body.clone(),
            Some(Body::Map(overlay)) if !self.method.carries_body() => Some(Body::Map(overlay)),
            Some(Body::Map(overlay)) => match &mut self.body {
                Some(Body::Map(stored)) => {
                    stored.extend(overlay);
                    self.body.clone()
                }
                _ => Some(Body::Map(overlay)),
            },
            Some(text) => Some(text),
        };
        return self.prepare(params, headers, body);
    }

    /// Uses each override wholesale in place of the stored value, nothing is written back.
    pub fn prepare_replace(&self, patch: RequestPatch) -> PreparedRequest {
        let params = patch.params.unwrap_or_else(|| self.params.clone());
        let headers = patch.headers.unwrap_or_else(|| self.headers.clone());
        let body = patch.payload.or_else(|| self.body.clone());
        return self.prepare(params, headers, body);
    }

    pub fn send(&self, context: &ExecutionContext) -> Result<reqwest::blocking::Response> {
        return self.prepare_send().execute(context);
    }

    pub fn update(&mut self, context: &ExecutionContext, patch: RequestPatch) -> Result<reqwest::blocking::Response> {
        return self.prepare_update(patch).execute(context);
    }

    pub fn replace(&self, context: &ExecutionContext, patch: RequestPatch) -> Result<reqwest::blocking::Response> {
        return self.prepare_replace(patch).execute(context);
    }
}

impl PreparedRequest {
    /// Headers as sent. `Content-Length` is left to the client.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            let key = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TunerError::InvalidHeader { name: name.clone(), reason: e.to_string() })?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TunerError::InvalidHeader { name: name.clone(), reason: e.to_string() })?;
            map.insert(key, value);
        }
        return Ok(map);
    }

    pub fn execute(self, context: &ExecutionContext) -> Result<reqwest::blocking::Response> {
        let headers = self.header_map()?;
        let mut req = context.client.request(self.method.into(), self.url.clone());
        if !self.params.is_empty() {
            req = req.query(&self.params);
        }
        req = match self.payload {
            Some(EncodedPayload::Json(text)) | Some(EncodedPayload::Raw(text)) => req.body(text),
            Some(EncodedPayload::Form(pairs)) => req.form(&pairs),
            None => req,
        };
        // set last so a scripted Content-Type wins over the one the form encoding adds
        req = req.headers(headers);

        debug!("{} {}", self.method, self.url);
        let res = req.send()?;
        info!("{} {} -> {}", self.method, res.url(), res.status());
        return Ok(res);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn strings(pairs: &[(&str, &str)]) -> StringMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn definition(method: HttpMethod) -> RequestDefinition {
        RequestDefinition::new(method.as_str(), method, "http://localhost/echo".parse().unwrap())
            .with_params(strings(&[("q1", "v1"), ("q2", "v2")]))
            .with_headers(strings(&[("User-Agent", "reqtuner"), ("Content-Type", "application/json")]))
            .with_body(map(json!({"d": "x", "dd": "y"})))
    }

    #[test]
    fn send_uses_stored_values() {
        let prepared = definition(HttpMethod::Post).prepare_send();
        assert_eq!(prepared.method, HttpMethod::Post);
        assert_eq!(prepared.params, strings(&[("q1", "v1"), ("q2", "v2")]));
        assert_eq!(prepared.payload, Some(EncodedPayload::Json(r#"{"d":"x","dd":"y"}"#.to_string())));
    }

    #[test]
    fn update_merges_params_and_headers() {
        let mut definition = definition(HttpMethod::Get);
        let patch = RequestPatch::new().with_param("q1", "v0").with_param("q3", "v3").with_header("X-Trace", "1");
        let prepared = definition.prepare_update(patch);
        assert_eq!(prepared.params, strings(&[("q1", "v0"), ("q2", "v2"), ("q3", "v3")]));
        assert_eq!(prepared.headers.len(), 3);
        assert_eq!(prepared.payload, None);
        assert_eq!(definition.params(), &strings(&[("q1", "v1"), ("q2", "v2")]));
    }

    #[test]
    fn update_accumulates_map_payload() {
        let mut definition = definition(HttpMethod::Post);
        let prepared = definition.prepare_update(RequestPatch::new().with_payload(map(json!({"ddd": "new"}))));
        assert_eq!(prepared.payload, Some(EncodedPayload::Json(r#"{"d":"x","dd":"y","ddd":"new"}"#.to_string())));
        assert_eq!(definition.body(), Some(&Body::Map(map(json!({"d": "x", "dd": "y", "ddd": "new"})))));

        let prepared = definition.prepare_update(RequestPatch::new().with_payload(map(json!({"d": "z"}))));
        let expected = json!({"d": "z", "dd": "y", "ddd": "new"}).to_string();
        assert_eq!(prepared.payload, Some(EncodedPayload::Json(expected)));
    }

    #[test]
    fn update_without_payload_keeps_merged_body() {
        let mut definition = definition(HttpMethod::Patch);
        definition.prepare_update(RequestPatch::new().with_payload(map(json!({"ddd": "new"}))));
        let prepared = definition.prepare_update(RequestPatch::new().with_param("q9", "v9"));
        assert_eq!(prepared.payload, Some(EncodedPayload::Json(r#"{"d":"x","dd":"y","ddd":"new"}"#.to_string())));
    }

    #[test]
    fn update_with_text_replaces_body_without_storing_it() {
        let mut definition = definition(HttpMethod::Put);
        let prepared = definition.prepare_update(RequestPatch::new().with_payload("updated strings"));
        assert_eq!(prepared.payload, Some(EncodedPayload::Raw("updated strings".to_string())));
        assert_eq!(definition.body(), Some(&Body::Map(map(json!({"d": "x", "dd": "y"})))));
    }

    #[test]
    fn update_map_over_text_body_is_not_stored() {
        let mut definition = definition(HttpMethod::Put).with_body("plain");
        let prepared = definition.prepare_update(RequestPatch::new().with_payload(map(json!({"a": "b"}))));
        assert_eq!(prepared.payload, Some(EncodedPayload::Json(r#"{"a":"b"}"#.to_string())));
        assert_eq!(definition.body(), Some(&Body::Text("plain".to_string())));
    }

    #[test]
    fn update_header_override_ignores_name_case() {
        let mut definition = definition(HttpMethod::Post);
        let patch = RequestPatch::new().with_header("content-type", "application/x-www-form-urlencoded");
        let prepared = definition.prepare_update(patch);
        assert_eq!(
            prepared.headers,
            strings(&[("User-Agent", "reqtuner"), ("content-type", "application/x-www-form-urlencoded")])
        );
        let pairs = vec![("d".to_string(), "x".to_string()), ("dd".to_string(), "y".to_string())];
        assert_eq!(prepared.payload, Some(EncodedPayload::Form(pairs)));
        let sent = prepared.header_map().unwrap();
        assert_eq!(sent.get("content-type").unwrap(), "application/x-www-form-urlencoded");
    }

    #[test]
    fn encoding_follows_the_content_type_that_is_sent() {
        let patch = RequestPatch::new()
            .with_headers(strings(&[("Content-Type", "text/plain"), ("content-type", "application/json")]));
        let prepared = definition(HttpMethod::Put).prepare_replace(patch);
        let sent = prepared.header_map().unwrap();
        assert_eq!(sent.get("content-type").unwrap(), "application/json");
        assert_eq!(prepared.payload, Some(EncodedPayload::Json(r#"{"d":"x","dd":"y"}"#.to_string())));
    }

    #[test]
    fn update_on_get_keeps_stored_body() {
        let mut definition = definition(HttpMethod::Get);
        let prepared = definition.prepare_update(RequestPatch::new().with_payload(map(json!({"ddd": "new"}))));
        assert_eq!(prepared.payload, None);
        assert_eq!(definition.body(), Some(&Body::Map(map(json!({"d": "x", "dd": "y"})))));
    }

    #[test]
    fn replace_drops_unnamed_keys() {
        let definition = definition(HttpMethod::Post);
        let patch = RequestPatch::new()
            .with_params(strings(&[("q1", "v0"), ("q3", "v3")]))
            .with_payload(map(json!({"ddd": "new"})));
        let prepared = definition.prepare_replace(patch);
        assert_eq!(prepared.params, strings(&[("q1", "v0"), ("q3", "v3")]));
        assert_eq!(prepared.headers, definition.headers().clone());
        assert_eq!(prepared.payload, Some(EncodedPayload::Json(r#"{"ddd":"new"}"#.to_string())));
        assert_eq!(definition, self::definition(HttpMethod::Post));
    }

    #[test]
    fn replace_with_empty_params_sends_none() {
        let prepared = definition(HttpMethod::Delete).prepare_replace(RequestPatch::new().with_params(StringMap::new()));
        assert!(prepared.params.is_empty());
    }

    #[test]
    fn replace_headers_changes_encoding() {
        let patch = RequestPatch::new().with_headers(strings(&[("Content-Type", "application/x-www-form-urlencoded")]));
        let prepared = definition(HttpMethod::Post).prepare_replace(patch);
        let pairs = vec![("d".to_string(), "x".to_string()), ("dd".to_string(), "y".to_string())];
        assert_eq!(prepared.payload, Some(EncodedPayload::Form(pairs)));
    }

    #[test_case(HttpMethod::Get, "application/json", Some(json!({"a": "b"})) => None ; "get has no body")]
    #[test_case(HttpMethod::Post, "application/json", None => None ; "no body")]
    #[test_case(HttpMethod::Post, "application/json", Some(json!({})) => None ; "empty json map")]
    #[test_case(HttpMethod::Put, "application/json", Some(json!("text")) => Some(EncodedPayload::Raw("text".to_string())) ; "text is never json encoded")]
    #[test_case(HttpMethod::Patch, " application/json ", Some(json!({"a": 1})) => Some(EncodedPayload::Json(r#"{"a":1}"#.to_string())) ; "json map")]
    #[test_case(HttpMethod::Post, "application/json; charset=utf-8", Some(json!({"a": "b"})) => Some(EncodedPayload::Form(vec![("a".to_string(), "b".to_string())])) ; "other content type")]
    #[test_case(HttpMethod::Delete, "text/plain", Some(json!({"a": 1, "b": null, "c": true})) => Some(EncodedPayload::Form(vec![("a".to_string(), "1".to_string()), ("c".to_string(), "true".to_string())])) ; "form stringifies scalars")]
    fn payload_encoding(method: HttpMethod, content_type: &str, body: Option<Value>) -> Option<EncodedPayload> {
        let headers = strings(&[("content-type", content_type)]);
        encode_payload(method, &headers, body.and_then(Body::from_value))
    }

    #[test]
    fn header_map_skips_content_length() {
        let mut prepared = definition(HttpMethod::Post).prepare_send();
        prepared.headers.insert("Content-Length".to_string(), "999".to_string());
        let headers = prepared.header_map().unwrap();
        assert_eq!(headers.len(), 2);
        assert!(headers.get("content-length").is_none());
    }

    #[test]
    fn invalid_header_is_rejected_before_sending() {
        let context = ExecutionContext::new(None).unwrap();
        let definition = definition(HttpMethod::Get);
        let result = definition.replace(&context, RequestPatch::new().with_header("bad header", "v"));
        assert!(matches!(result, Err(TunerError::InvalidHeader { .. })));
    }

    #[test]
    fn transport_errors_are_propagated() {
        let context = ExecutionContext::new(Some(Duration::from_secs(5))).unwrap();
        let definition = RequestDefinition::new("closed", HttpMethod::Get, "http://127.0.0.1:1/".parse().unwrap());
        assert!(matches!(definition.send(&context), Err(TunerError::Transport(_))));
    }
}
