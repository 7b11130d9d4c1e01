//! Materializing a [`Volume`] onto disk.
//!
//! Every variant bottoms out in either an inline byte buffer (decoded and
//! unzipped) or an HTTP fetch; `MultiVolume` just applies its children in
//! order into the same destination directory.

use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use executor_core::{FailureContext, JobError, JobFailureReason};
use executor_core::protocol::Volume;

fn download_failed(message: impl Into<String>, context: FailureContext) -> JobError {
    JobError::new(message, JobFailureReason::DownloadFailed).with_context(context)
}

pub async fn materialize(
    volume: &Volume,
    dest: &Path,
    http: &reqwest::Client,
    max_size_bytes: u64,
) -> Result<(), JobError> {
    match volume {
        Volume::Inline { contents } => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(contents)
                .map_err(|err| {
                    download_failed(
                        format!("inline volume is not valid base64: {err}"),
                        FailureContext::new(),
                    )
                })?;
            enforce_size_limit(bytes.len() as u64, max_size_bytes)?;
            unzip_into(&bytes, dest)
        }
        Volume::ZipUrl { url } => {
            let bytes = fetch(http, url, max_size_bytes).await?;
            unzip_into(&bytes, dest)
        }
        Volume::SingleFile { url, relative_path } => {
            let bytes = fetch(http, url, max_size_bytes).await?;
            write_relative(dest, relative_path, &bytes)
        }
        Volume::MultiVolume { volumes } => {
            for child in volumes {
                Box::pin(materialize(child, dest, http, max_size_bytes)).await?;
            }
            Ok(())
        }
        Volume::HuggingfaceVolume {
            repo_id,
            revision,
            repo_type,
            allow_patterns,
        } => {
            download_huggingface_snapshot(
                http,
                repo_id,
                revision.as_deref().unwrap_or("main"),
                repo_type.as_deref().unwrap_or("models"),
                allow_patterns.as_deref(),
                dest,
                max_size_bytes,
            )
            .await
        }
    }
}

fn enforce_size_limit(size: u64, max_size_bytes: u64) -> Result<(), JobError> {
    if size > max_size_bytes {
        return Err(download_failed(
            format!("Input volume too large: {size} bytes exceeds limit of {max_size_bytes} bytes"),
            FailureContext::new().with("size_bytes", size as i64).with("limit_bytes", max_size_bytes as i64),
        ));
    }
    Ok(())
}

async fn fetch(http: &reqwest::Client, url: &str, max_size_bytes: u64) -> Result<Vec<u8>, JobError> {
    let response = http.get(url).send().await.map_err(|err| {
        download_failed(
            format!("failed to fetch volume from {url}: {err}"),
            FailureContext::new().with("url", url),
        )
    })?;
    let response = response.error_for_status().map_err(|err| {
        download_failed(
            format!("volume fetch from {url} returned an error status: {err}"),
            FailureContext::new().with("url", url),
        )
    })?;
    if let Some(len) = response.content_length() {
        enforce_size_limit(len, max_size_bytes)?;
    }
    let bytes = response.bytes().await.map_err(|err| {
        download_failed(
            format!("failed to read volume body from {url}: {err}"),
            FailureContext::new().with("url", url),
        )
    })?;
    enforce_size_limit(bytes.len() as u64, max_size_bytes)?;
    Ok(bytes.to_vec())
}

fn unzip_into(bytes: &[u8], dest: &Path) -> Result<(), JobError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|err| {
        download_failed(format!("volume is not a valid zip archive: {err}"), FailureContext::new())
    })?;
    archive.extract(dest).map_err(|err| {
        download_failed(
            format!("failed to extract volume archive: {err}"),
            FailureContext::new(),
        )
    })
}

fn write_relative(dest: &Path, relative_path: &str, bytes: &[u8]) -> Result<(), JobError> {
    let target = dest.join(relative_path);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            download_failed(
                format!("failed to create directory for {relative_path}: {err}"),
                FailureContext::new(),
            )
        })?;
    }
    std::fs::write(&target, bytes).map_err(|err| {
        download_failed(
            format!("failed to write volume file {relative_path}: {err}"),
            FailureContext::new(),
        )
    })
}

/// Matches a repo-relative file path against a shell-style glob where `*`
/// stands for "anything" (including `/`). No brace expansion, no `?` — the
/// patterns the coordinator sends are simple suffix/prefix globs like
/// `*.safetensors`.
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let mut segments = pattern.split('*');
    let first = segments.next().unwrap_or("");
    if !path.starts_with(first) {
        return false;
    }
    let mut cursor = first.len();
    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        match path[cursor..].find(segment) {
            Some(pos) => cursor += pos + segment.len(),
            None => return false,
        }
    }
    true
}

fn allowed(path: &str, allow_patterns: Option<&[String]>) -> bool {
    match allow_patterns {
        None => true,
        Some(patterns) => patterns.iter().any(|p| matches_pattern(path, p)),
    }
}

#[derive(serde::Deserialize)]
struct HubFile {
    rfilename: String,
}

#[derive(serde::Deserialize)]
struct HubRepoInfo {
    siblings: Vec<HubFile>,
}

async fn download_huggingface_snapshot(
    http: &reqwest::Client,
    repo_id: &str,
    revision: &str,
    repo_type: &str,
    allow_patterns: Option<&[String]>,
    dest: &Path,
    max_size_bytes: u64,
) -> Result<(), JobError> {
    let type_segment = match repo_type {
        "models" | "model" => "models",
        "datasets" | "dataset" => "datasets",
        "spaces" | "space" => "spaces",
        other => {
            return Err(download_failed(
                format!("unknown huggingface repo_type: {other}"),
                FailureContext::new(),
            ))
        }
    };
    let info_url = format!("https://huggingface.co/api/{type_segment}/{repo_id}/revision/{revision}");
    let info: HubRepoInfo = http
        .get(&info_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|err| {
            download_failed(
                format!("failed to list huggingface repo {repo_id}: {err}"),
                FailureContext::new().with("repo_id", repo_id),
            )
        })?
        .json()
        .await
        .map_err(|err| {
            download_failed(
                format!("failed to parse huggingface repo listing for {repo_id}: {err}"),
                FailureContext::new(),
            )
        })?;

    for file in info.siblings {
        if !allowed(&file.rfilename, allow_patterns) {
            continue;
        }
        let file_url = format!(
            "https://huggingface.co/{type_segment}/{repo_id}/resolve/{revision}/{}",
            file.rfilename
        );
        let bytes = fetch(http, &file_url, max_size_bytes).await?;
        write_relative(dest, &file.rfilename, &bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_suffix() {
        assert!(matches_pattern("model.safetensors", "*.safetensors"));
        assert!(!matches_pattern("model.bin", "*.safetensors"));
    }

    #[test]
    fn glob_without_star_requires_exact_match() {
        assert!(matches_pattern("config.json", "config.json"));
        assert!(!matches_pattern("config.json.bak", "config.json"));
    }

    #[test]
    fn allowed_with_no_patterns_accepts_everything() {
        assert!(allowed("anything.txt", None));
    }

    #[test]
    fn enforce_size_limit_rejects_oversized_payloads() {
        let err = enforce_size_limit(2, 1).unwrap_err();
        assert_eq!(err.reason, JobFailureReason::DownloadFailed);
        assert!(err.message.contains("Input volume too large"));
    }

    #[test]
    fn enforce_size_limit_accepts_exact_boundary() {
        assert!(enforce_size_limit(1, 1).is_ok());
    }
}
