//! Production [`CoordinatorClient`]: one WebSocket connection opened once
//! per job, JSON text frames in both directions.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use executor_core::protocol::{
    JobResult, OutboundMessage, V0ExecutionDoneRequest, V0ExecutorReadyRequest, V0HordeFailedRequest,
    V0InitialJobRequest, V0JobFailedRequest, V0JobFinishedRequest, V0JobRequest,
    V0StreamingJobReadyRequest, V0VolumesReadyRequest,
};
use executor_core::{CoordinatorClient, HordeError, JobId};

/// Streaming endpoints default to this port when the runner's certificate
/// payload doesn't carry one of its own (§6's streaming-job-ready contract
/// only specifies `public_key`/`ip` as driver-visible; `port` is an executor
/// deployment detail).
const DEFAULT_STREAMING_PORT: u16 = 443;

pub struct WsCoordinatorClient {
    job_uuid: JobId,
    socket: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WsCoordinatorClient {
    pub async fn connect(url: &str, job_uuid: JobId) -> anyhow::Result<Self> {
        let (socket, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { job_uuid, socket })
    }

    async fn recv_json<T: serde::de::DeserializeOwned>(&mut self, what: &str) -> Result<T, HordeError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|err| HordeError::new(format!("malformed {what}: {err}")));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(other)) => {
                    return Err(HordeError::new(format!(
                        "expected a text frame for {what}, got {other:?}"
                    )));
                }
                Some(Err(err)) => {
                    return Err(HordeError::new(format!("coordinator transport error waiting for {what}: {err}")));
                }
                None => {
                    return Err(HordeError::new(format!(
                        "coordinator closed the connection before sending {what}"
                    )));
                }
            }
        }
    }

    async fn send(&mut self, message: OutboundMessage) {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize outbound coordinator message");
                return;
            }
        };
        if let Err(err) = self.socket.send(Message::Text(text.into())).await {
            tracing::warn!(error = %err, "failed to send outbound coordinator message, dropping it");
        }
    }
}

/// Unpacks the opaque certificate string [`executor_core::JobRunner::executor_certificate`]
/// hands back into the `(public_key, ip)` pair the wire message wants.
/// Falls back to treating the whole string as the public key if it isn't
/// in the `prefix:ip:public_key` shape the bundled runner produces.
fn split_certificate(certificate: &str) -> (String, Option<String>) {
    let mut parts = certificate.rsplitn(2, ':');
    let public_key = parts.next().unwrap_or(certificate).to_string();
    let rest = parts.next();
    let ip = rest.and_then(|r| r.rsplit_once(':')).map(|(_, ip)| ip.to_string());
    (public_key, ip)
}

#[async_trait]
impl CoordinatorClient for WsCoordinatorClient {
    fn job_uuid(&self) -> JobId {
        self.job_uuid
    }

    async fn initial_msg(&mut self) -> Result<V0InitialJobRequest, HordeError> {
        self.recv_json("the initial job request").await
    }

    async fn full_payload(&mut self) -> Result<V0JobRequest, HordeError> {
        self.recv_json("the full job payload").await
    }

    async fn send_executor_ready(&mut self) {
        self.send(OutboundMessage::V0ExecutorReadyRequest(V0ExecutorReadyRequest {
            job_uuid: self.job_uuid,
            executor_token: None,
        }))
        .await;
    }

    async fn send_streaming_job_ready(&mut self, certificate: String) {
        let (public_key, ip) = split_certificate(&certificate);
        self.send(OutboundMessage::V0StreamingJobReadyRequest(V0StreamingJobReadyRequest {
            job_uuid: self.job_uuid,
            executor_token: None,
            public_key,
            ip: ip.unwrap_or_default(),
            port: DEFAULT_STREAMING_PORT,
            miner_signature: None,
        }))
        .await;
    }

    async fn send_volumes_ready(&mut self) {
        self.send(OutboundMessage::V0VolumesReadyRequest(V0VolumesReadyRequest {
            job_uuid: self.job_uuid,
        }))
        .await;
    }

    async fn send_execution_done(&mut self) {
        self.send(OutboundMessage::V0ExecutionDoneRequest(V0ExecutionDoneRequest {
            job_uuid: self.job_uuid,
        }))
        .await;
    }

    async fn send_result(&mut self, result: JobResult) {
        self.send(OutboundMessage::V0JobFinishedRequest(V0JobFinishedRequest {
            job_uuid: self.job_uuid,
            docker_process_stdout: result.docker_process_stdout,
            docker_process_stderr: result.docker_process_stderr,
            artifacts: result.artifacts,
            upload_results: result.upload_results,
        }))
        .await;
    }

    async fn send_job_failed(&mut self, request: V0JobFailedRequest) {
        self.send(OutboundMessage::V0JobFailedRequest(request)).await;
    }

    async fn send_horde_failed(&mut self, request: V0HordeFailedRequest) {
        self.send(OutboundMessage::V0HordeFailedRequest(request)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_certificate_unpacks_stub_runner_format() {
        let (public_key, ip) = split_certificate("streaming-cert:127.0.0.1:PK");
        assert_eq!(public_key, "PK");
        assert_eq!(ip.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn split_certificate_falls_back_to_whole_string_as_public_key() {
        let (public_key, ip) = split_certificate("opaque-blob");
        assert_eq!(public_key, "opaque-blob");
        assert_eq!(ip, None);
    }
}
