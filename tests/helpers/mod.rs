use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use axum::{
    body::Bytes,
    http::{header::CONTENT_TYPE, HeaderMap, Method, Uri},
    Json, Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const BASE_URL_PLACEHOLDER: &str = "{{BASE_URL}}";

fn pairs(encoded: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(encoded.as_bytes()).into_owned().collect()
}

pub const DELAY_PATH: &str = "/delay";

/// Answers every request with what it received, in the shape httpbin uses.
/// Requests to `/delay` are answered after two seconds.
async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    if uri.path() == DELAY_PATH {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
    let data = String::from_utf8_lossy(&body).to_string();
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let form = if content_type.starts_with("application/x-www-form-urlencoded") {
        pairs(&data)
    } else {
        BTreeMap::new()
    };
    let echoed_headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect();

    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "args": pairs(uri.query().unwrap_or_default()),
        "headers": echoed_headers,
        "data": data,
        "json": serde_json::from_str::<Value>(&data).unwrap_or(Value::Null),
        "form": form,
    }))
}

/// Starts the echo server on a background runtime and returns its base url.
pub fn spawn_echo_server() -> String {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind echo server");
            tx.send(listener.local_addr().expect("echo server address")).expect("report address");
            axum::serve(listener, Router::new().fallback(echo)).await.expect("echo server");
        });
    });
    format!("http://{}", rx.recv().expect("echo server started"))
}

fn copy_tree(from: &Path, to: &Path, base_url: &str) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let path = entry.unwrap().path();
        let target = to.join(path.file_name().unwrap());
        if path.is_dir() {
            copy_tree(&path, &target, base_url);
        } else {
            let text = fs::read_to_string(&path).unwrap();
            fs::write(target, text.replace(BASE_URL_PLACEHOLDER, base_url)).unwrap();
        }
    }
}

pub fn fixture_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join(relative)
}

/// Copies a fixture directory below `tests/` into a temporary directory, pointing it at `base_url`.
pub fn fixture_dir(relative: &str, base_url: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    copy_tree(&fixture_path(relative), dir.path(), base_url);
    dir
}
