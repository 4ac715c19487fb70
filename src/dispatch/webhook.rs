use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use super::{
    parse_generation_result, DispatchError, GenerationBackend, GenerationRequest, GenerationResult,
};
use crate::session::GenerationSettings;
use crate::utils::http::build_http_client;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    user_id: i64,
    chat_id: i64,
    settings: &'a GenerationSettings,
    photo_url: &'a str,
}

/// HTTP client for the n8n generation webhook.
pub struct WebhookClient {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl WebhookClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            endpoint,
            timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> DispatchError {
        if err.is_timeout() {
            DispatchError::Timeout(self.timeout)
        } else {
            DispatchError::Transport(err.to_string())
        }
    }

    pub async fn send(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, DispatchError> {
        let payload = WebhookPayload {
            user_id: request.user_id,
            chat_id: request.chat_id,
            settings: &request.settings,
            photo_url: &request.photo_url,
        };

        info!("Sending request to n8n for user {}", request.user_id);
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "n8n returned status {} for user {}: {}",
                status, request.user_id, body
            );
            return Err(DispatchError::Transport(format!(
                "webhook returned status {status}"
            )));
        }

        let body = response.bytes().await.map_err(|err| self.classify(err))?;
        let result = parse_generation_result(&body)?;
        info!(
            "Response from n8n for user {}: success={}",
            request.user_id, result.success
        );
        Ok(result)
    }
}

#[async_trait]
impl GenerationBackend for WebhookClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, DispatchError> {
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value as JsonValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    use super::*;

    async fn read_request_body(socket: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 1024];
        let header_end = loop {
            let read = socket.read(&mut chunk).await.unwrap();
            if read == 0 {
                return String::new();
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let headers = String::from_utf8_lossy(&buffer[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buffer.len() < header_end + content_length {
            let read = socket.read(&mut chunk).await.unwrap();
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
        }

        String::from_utf8_lossy(&buffer[header_end..]).to_string()
    }

    /// Serves one HTTP response and yields the request body it received.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
        delay: Duration,
    ) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request_body = read_request_body(&mut socket).await;
            tokio::time::sleep(delay).await;
            let reply = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(reply.as_bytes()).await;
            let _ = socket.shutdown().await;
            request_body
        });
        let url = Url::parse(&format!("http://{addr}/webhook/portrait")).unwrap();
        (url, handle)
    }

    fn sample_request() -> GenerationRequest {
        GenerationRequest {
            user_id: 1001,
            chat_id: 2002,
            settings: GenerationSettings::new(),
            photo_url: "https://api.telegram.org/file/botX/photos/file_1.jpg".to_string(),
        }
    }

    #[tokio::test]
    async fn posts_payload_and_parses_success() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"success": true, "message": "done"}"#,
            Duration::ZERO,
        )
        .await;
        let client = WebhookClient::new(url, Duration::from_secs(5)).unwrap();

        let result = client.send(&sample_request()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("done"));

        let sent: JsonValue = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(sent["user_id"], 1001);
        assert_eq!(sent["chat_id"], 2002);
        assert_eq!(sent["settings"], serde_json::json!({}));
        assert_eq!(
            sent["photo_url"],
            "https://api.telegram.org/file/botX/photos/file_1.jpg"
        );
    }

    #[tokio::test]
    async fn reports_unsuccessful_generation_as_result() {
        let (url, _server) = serve_once("200 OK", r#"{"success": false}"#, Duration::ZERO).await;
        let client = WebhookClient::new(url, Duration::from_secs(5)).unwrap();

        let result = client.send(&sample_request()).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn malformed_body_is_transport_failure() {
        let (url, _server) = serve_once("200 OK", "Workflow was started", Duration::ZERO).await;
        let client = WebhookClient::new(url, Duration::from_secs(5)).unwrap();

        let err = client.send(&sample_request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn error_status_is_transport_failure() {
        let (url, _server) = serve_once(
            "500 Internal Server Error",
            r#"{"success": true}"#,
            Duration::ZERO,
        )
        .await;
        let client = WebhookClient::new(url, Duration::from_secs(5)).unwrap();

        let err = client.send(&sample_request()).await.unwrap_err();
        match err {
            DispatchError::Transport(detail) => assert!(detail.contains("500")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_webhook_times_out() {
        let (url, server) =
            serve_once("200 OK", r#"{"success": true}"#, Duration::from_secs(3)).await;
        let client = WebhookClient::new(url, Duration::from_millis(200)).unwrap();

        let err = client.send(&sample_request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)), "{err:?}");
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_webhook_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/webhook")).unwrap();
        let client = WebhookClient::new(url, Duration::from_secs(5)).unwrap();
        let err = client.send(&sample_request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)), "{err:?}");
    }
}
