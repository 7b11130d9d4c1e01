//! Delivering collected artifacts per an [`OutputUpload`] target.
//!
//! Each leaf upload produces one `(name, response_body)` pair that the
//! driver forwards to the coordinator as `upload_results`. `MultiUpload`
//! just runs its children and merges their maps.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use executor_core::protocol::OutputUpload;
use executor_core::{FailureContext, JobError, JobFailureReason};

use crate::fsutil::walk_files;

fn upload_failed(message: impl Into<String>, context: FailureContext) -> JobError {
    JobError::new(message, JobFailureReason::UploadFailed).with_context(context)
}

pub async fn upload(
    output: &OutputUpload,
    artifacts_dir: &Path,
    http: &reqwest::Client,
    max_attempts: u32,
) -> Result<BTreeMap<String, String>, JobError> {
    upload_named(output, artifacts_dir, http, "result", max_attempts).await
}

async fn upload_named(
    output: &OutputUpload,
    artifacts_dir: &Path,
    http: &reqwest::Client,
    name: &str,
    max_attempts: u32,
) -> Result<BTreeMap<String, String>, JobError> {
    match output {
        OutputUpload::ZipAndHttpPost { url, form_fields } => {
            let archive = zip_directory(artifacts_dir)?;
            let body =
                post_multipart_with_retry(http, url, form_fields, "output.zip", &archive, max_attempts).await?;
            Ok(BTreeMap::from([(name.to_string(), body)]))
        }
        OutputUpload::ZipAndHttpPut { url } => {
            let archive = zip_directory(artifacts_dir)?;
            let body = put_bytes_with_retry(http, url, &archive, max_attempts).await?;
            Ok(BTreeMap::from([(name.to_string(), body)]))
        }
        OutputUpload::SingleFilePost {
            url,
            relative_path,
            form_fields,
        } => {
            let bytes = read_relative(artifacts_dir, relative_path)?;
            let body =
                post_multipart_with_retry(http, url, form_fields, relative_path, &bytes, max_attempts).await?;
            Ok(BTreeMap::from([(name.to_string(), body)]))
        }
        OutputUpload::SingleFilePut { url, relative_path } => {
            let bytes = read_relative(artifacts_dir, relative_path)?;
            let body = put_bytes_with_retry(http, url, &bytes, max_attempts).await?;
            Ok(BTreeMap::from([(name.to_string(), body)]))
        }
        OutputUpload::MultiUpload { uploads, system_output } => {
            let mut results = BTreeMap::new();
            for (index, child) in uploads.iter().enumerate() {
                let child_name = format!("upload_{index}");
                let child_results =
                    Box::pin(upload_named(child, artifacts_dir, http, &child_name, max_attempts)).await?;
                results.extend(child_results);
            }
            if let Some(system) = system_output {
                let system_results = Box::pin(upload_named(
                    system,
                    artifacts_dir,
                    http,
                    "system_output",
                    max_attempts,
                ))
                .await?;
                results.extend(system_results);
            }
            Ok(results)
        }
    }
}

fn read_relative(artifacts_dir: &Path, relative_path: &str) -> Result<Vec<u8>, JobError> {
    std::fs::read(artifacts_dir.join(relative_path)).map_err(|err| {
        upload_failed(
            format!("failed to read artifact {relative_path} for upload: {err}"),
            FailureContext::new(),
        )
    })
}

fn zip_directory(dir: &Path) -> Result<Vec<u8>, JobError> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for entry in walk_files(dir).map_err(|err| {
            upload_failed(format!("failed to walk artifacts directory: {err}"), FailureContext::new())
        })? {
            let relative = entry
                .strip_prefix(dir)
                .unwrap_or(&entry)
                .to_string_lossy()
                .replace('\\', "/");
            writer.start_file(relative, options).map_err(|err| {
                upload_failed(format!("failed to start zip entry: {err}"), FailureContext::new())
            })?;
            let contents = std::fs::read(&entry).map_err(|err| {
                upload_failed(format!("failed to read artifact for zipping: {err}"), FailureContext::new())
            })?;
            writer.write_all(&contents).map_err(|err| {
                upload_failed(format!("failed to write zip entry: {err}"), FailureContext::new())
            })?;
        }
        writer.finish().map_err(|err| {
            upload_failed(format!("failed to finalize output zip: {err}"), FailureContext::new())
        })?;
    }
    Ok(buffer.into_inner())
}

/// Retries a fallible upload attempt up to `max_attempts` times with a
/// linear backoff. The coordinator-visible upload either fully succeeds or
/// reports the last attempt's error; retries are this runner's concern, the
/// driver sees neither the attempt count nor the intermediate failures.
async fn with_retries<F, Fut>(max_attempts: u32, mut attempt: F) -> Result<String, JobError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, JobError>>,
{
    let attempts = max_attempts.max(1);
    let mut last_err = None;
    for attempt_no in 1..=attempts {
        match attempt().await {
            Ok(body) => return Ok(body),
            Err(err) => {
                tracing::warn!(attempt = attempt_no, attempts, error = %err, "upload attempt failed");
                last_err = Some(err);
                if attempt_no < attempts {
                    tokio::time::sleep(std::time::Duration::from_millis(200 * attempt_no as u64)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| upload_failed("upload failed with no attempts made", FailureContext::new())))
}

async fn post_multipart_with_retry(
    http: &reqwest::Client,
    url: &str,
    form_fields: &BTreeMap<String, String>,
    file_name: &str,
    bytes: &[u8],
    max_attempts: u32,
) -> Result<String, JobError> {
    with_retries(max_attempts, || post_multipart(http, url, form_fields, file_name, bytes)).await
}

async fn put_bytes_with_retry(
    http: &reqwest::Client,
    url: &str,
    bytes: &[u8],
    max_attempts: u32,
) -> Result<String, JobError> {
    with_retries(max_attempts, || put_bytes(http, url, bytes)).await
}

async fn post_multipart(
    http: &reqwest::Client,
    url: &str,
    form_fields: &BTreeMap<String, String>,
    file_name: &str,
    bytes: &[u8],
) -> Result<String, JobError> {
    let mut form = reqwest::multipart::Form::new();
    for (key, value) in form_fields {
        form = form.text(key.clone(), value.clone());
    }
    let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
    form = form.part("file", part);

    let response = http.post(url).multipart(form).send().await.map_err(|err| {
        upload_failed(
            format!("upload POST to {url} failed: {err}"),
            FailureContext::new().with("url", url),
        )
    })?;
    response_body(response, url).await
}

async fn put_bytes(http: &reqwest::Client, url: &str, bytes: &[u8]) -> Result<String, JobError> {
    let response = http.put(url).body(bytes.to_vec()).send().await.map_err(|err| {
        upload_failed(
            format!("upload PUT to {url} failed: {err}"),
            FailureContext::new().with("url", url),
        )
    })?;
    response_body(response, url).await
}

async fn response_body(response: reqwest::Response, url: &str) -> Result<String, JobError> {
    let response = response.error_for_status().map_err(|err| {
        upload_failed(
            format!("upload to {url} returned an error status: {err}"),
            FailureContext::new().with("url", url),
        )
    })?;
    response.text().await.map_err(|err| {
        upload_failed(
            format!("failed to read upload response body from {url}: {err}"),
            FailureContext::new(),
        )
    })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn retries_then_succeeds_on_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(400))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/upload", server.uri());
        let body = put_bytes_with_retry(&http, &url, b"artifact-bytes", 3)
            .await
            .expect("upload should succeed on the third attempt");
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(400))
            .expect(3)
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/upload", server.uri());
        let err = put_bytes_with_retry(&http, &url, b"artifact-bytes", 3)
            .await
            .expect_err("upload should be exhausted after max_attempts");
        assert_eq!(err.reason, JobFailureReason::UploadFailed);
    }

    #[tokio::test]
    async fn multipart_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(400))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
            .expect(1)
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/upload", server.uri());
        let form_fields = BTreeMap::new();
        let body =
            post_multipart_with_retry(&http, &url, &form_fields, "output.zip", b"zip-bytes", 3)
                .await
                .expect("upload should succeed on the third attempt");
        assert_eq!(body, "accepted");
    }
}
