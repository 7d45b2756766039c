// src/util.rs

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Resolve a path relative to the directory holding `anchor_file`.
///
/// Absolute paths are returned unchanged.
///
/// Example:
/// anchor at `/project/cells/sma.cell.yaml`, rel `sma.py`
/// → `/project/cells/sma.py`
pub fn resolve_relative_to(anchor_file: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Ok(rel_path.to_path_buf());
    }

    let base = anchor_file
        .parent()
        .context("Anchor path has no parent directory")?;
    Ok(base.join(rel_path))
}

/// Read a UTF-8 file into a String with a clear error message.
pub fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read file {:?}", path))
}

/// Ensure a directory exists (create it if missing).
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory {:?}", path))
}

/// Parse a `key=value` CLI parameter.
///
/// The value is read as JSON when it parses (`window=5`, `flag=true`,
/// `xs=[1,2]`), otherwise kept as a plain string (`title=Prices`).
pub fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Parameter {:?} must look like key=value", raw);
    };

    let key = key.trim();
    if key.is_empty() {
        bail!("Parameter {:?} has an empty key", raw);
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relative_paths_anchor_on_parent() {
        let p = resolve_relative_to(Path::new("/project/cells/a.cell.yaml"), "a.py").unwrap();
        assert_eq!(p, PathBuf::from("/project/cells/a.py"));

        let abs = resolve_relative_to(Path::new("/project/a.cell.yaml"), "/srv/a.py").unwrap();
        assert_eq!(abs, PathBuf::from("/srv/a.py"));
    }

    #[test]
    fn params_parse_as_json_or_string() {
        assert_eq!(parse_param("window=5").unwrap(), ("window".into(), json!(5)));
        assert_eq!(parse_param("xs=[1,2]").unwrap(), ("xs".into(), json!([1, 2])));
        assert_eq!(parse_param("title=Prices").unwrap(), ("title".into(), json!("Prices")));
        assert_eq!(parse_param("expr=a=b").unwrap(), ("expr".into(), json!("a=b")));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=3").is_err());
    }
}
