//! Harvesting files out of the job's artifacts directory into the base64
//! map the coordinator expects (§6).
//!
//! A file over `max_file_bytes` is omitted entirely rather than truncated —
//! a partial artifact is worse than a missing one, and truncation would
//! silently corrupt whatever format the file is in.

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;

use crate::fsutil::walk_files;

/// Harvests `dir` (the host side of the container's artifacts bind mount)
/// into a map keyed by the file's absolute path *inside the container*
/// (`container_root` joined with the path relative to `dir`), matching what
/// the job actually wrote to, not wherever the host happened to stage it.
pub fn harvest(dir: &Path, container_root: &str, max_file_bytes: u64) -> BTreeMap<String, String> {
    let mut artifacts = BTreeMap::new();
    let Ok(files) = walk_files(dir) else {
        return artifacts;
    };
    let container_root = container_root.trim_end_matches('/');
    for path in files {
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if metadata.len() > max_file_bytes {
            tracing::warn!(path = %path.display(), size = metadata.len(), cap = max_file_bytes, "artifact exceeds size cap, omitting");
            continue;
        }
        let Ok(contents) = std::fs::read(&path) else {
            continue;
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&contents);
        let relative = path.strip_prefix(dir).unwrap_or(&path).to_string_lossy().replace('\\', "/");
        artifacts.insert(format!("{container_root}/{relative}"), encoded);
    }
    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_at_exactly_the_cap_is_included() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact.bin");
        std::fs::File::create(&path).unwrap().write_all(&[0u8; 16]).unwrap();

        let artifacts = harvest(dir.path(), "/artifacts", 16);
        assert_eq!(artifacts.len(), 1);
    }

    #[test]
    fn file_one_byte_over_the_cap_is_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("over.bin");
        std::fs::File::create(&path).unwrap().write_all(&[0u8; 17]).unwrap();

        let artifacts = harvest(dir.path(), "/artifacts", 16);
        assert!(artifacts.is_empty());
    }

    #[test]
    fn empty_file_is_included_as_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::File::create(&path).unwrap();

        let artifacts = harvest(dir.path(), "/artifacts", 16);
        assert_eq!(artifacts.values().next().unwrap(), "");
    }

    #[test]
    fn keys_are_rooted_at_the_container_artifacts_path_not_the_host_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("small.txt")).unwrap().write_all(b"x").unwrap();

        let artifacts = harvest(dir.path(), "/artifacts", 16);
        assert_eq!(artifacts.keys().next().map(String::as_str), Some("/artifacts/small.txt"));
    }

    #[test]
    fn missing_directory_yields_no_artifacts() {
        let artifacts = harvest(Path::new("/nonexistent/does/not/exist"), "/artifacts", 16);
        assert!(artifacts.is_empty());
    }
}
