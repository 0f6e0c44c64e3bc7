//! JSON artifact persistence.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::GraphRagResult;

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> GraphRagResult<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Serialize `value` to `path` through a sibling temp file and a rename, so a
/// crash mid-write never leaves a truncated artifact behind.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> GraphRagResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    let body = serde_json::to_vec_pretty(value)?;
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a JSON-lines file. Blank and unparsable lines are skipped.
pub fn read_jsonl(path: &Path) -> GraphRagResult<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => out.push(value),
            Err(e) => warn!(path = %path.display(), line = lineno + 1, error = %e, "Skipping bad JSONL line"),
        }
    }
    Ok(out)
}

/// Append one record as a JSON line.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> GraphRagResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    file.write_all(&line)?;
    file.flush()?;
    Ok(())
}

/// Read a JSON document that is either an array or JSON lines.
pub fn read_records(path: &Path) -> GraphRagResult<Vec<Value>> {
    let raw = fs::read_to_string(path)?;
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    read_jsonl(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_atomic_write_creates_parent_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("profiles.json");
        write_json_atomic(&path, &json!({"a": 1})).unwrap();
        let back: Value = read_json(&path).unwrap();
        assert_eq!(back["a"], 1);
        assert!(!dir.path().join("nested").join("profiles.json.tmp").exists());
    }

    #[test]
    fn test_jsonl_append_and_read_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        append_jsonl(&path, &json!({"chunk_id": 1})).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{broken\n\n")
            .unwrap();
        append_jsonl(&path, &json!({"chunk_id": 2})).unwrap();
        let rows = read_jsonl(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(read_records(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_read_records_accepts_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        fs::write(&path, r#"[{"id": 1}, {"id": 2}]"#).unwrap();
        assert_eq!(read_records(&path).unwrap().len(), 2);
    }
}
