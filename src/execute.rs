use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::capture_parser::{convert_capture, default_output_path};
use crate::http_request_executor::{ExecutionContext, RequestPatch};
use crate::registry::load_registry;

const CAPTURE_EXTENSION: &str = "txt";

/// How overrides given on the command line are applied.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PatchMode {
    Update,
    Replace,
}

pub fn convert_capture_files(files: Vec<&PathBuf>, output: Option<&PathBuf>) -> Result<()> {
    if output.is_some() && files.len() != 1 {
        return Err(anyhow!("an output path can only be given for a single capture file"));
    }
    for p in files {
        if !p.is_file() {
            return Err(anyhow!(format!("file {:?} not found", p.to_path_buf())));
        }
        let target = output.cloned().unwrap_or_else(|| default_output_path(p));
        convert_capture(p, &target).context(format!("while converting file {}", p.display()))?;
        println!("{} -> {}", p.display(), target.display());
    }
    return Ok(());
}

/// Converts every `*.txt` capture in `dir`.
pub fn convert_directory(dir: &Path) -> Result<()> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).context(format!("while listing {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|ext| ext == CAPTURE_EXTENSION).unwrap_or(false) {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(anyhow!("no .{} files found in {}", CAPTURE_EXTENSION, dir.display()));
    }
    files.sort();
    return convert_capture_files(files.iter().collect(), None);
}

pub fn list_requests(dir: &Path) -> Result<()> {
    let registry = load_registry(dir).context(format!("while loading {}", dir.display()))?;
    for (name, definition) in registry.iter() {
        println!("{} {} {}", name, definition.method(), definition.url());
    }
    return Ok(());
}

pub fn send_request(
    dir: &Path,
    name: &str,
    patch: RequestPatch,
    mode: PatchMode,
    context: &ExecutionContext,
) -> Result<()> {
    let mut registry = load_registry(dir).context(format!("while loading {}", dir.display()))?;
    let definition = registry
        .get_mut(name)
        .ok_or_else(|| anyhow!("no request named '{}' below {}", name, dir.display()))?;

    let result = if patch.is_empty() {
        definition.send(context)
    } else if mode == PatchMode::Replace {
        definition.replace(context, patch)
    } else {
        definition.update(context, patch)
    };
    let res = result.context(format!("while sending {}", name))?;

    let headers: String = res
        .headers()
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value.to_str().unwrap_or("<binary>")))
        .collect::<Vec<String>>()
        .join("\n");
    println!("{} {}\n", res.status(), res.url());
    println!("{}\n", headers);
    println!("{}", res.text()?);
    return Ok(());
}
