use crate::config::AgentConfig;
use reqwest::{Client, Url};
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Wire payload for one presence report. Built fresh per tick and dropped
/// once the send attempt resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub secret: String,
    #[serde(rename = "device")]
    pub device_id: u32,
    #[serde(rename = "status", serialize_with = "screen_flag")]
    pub screen_on: bool,
    #[serde(rename = "app")]
    pub app_label: String,
}

/// The collector expects `status` as 1/0, not true/false.
fn screen_flag<S: Serializer>(screen_on: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*screen_on))
}

impl StatusReport {
    pub fn new(config: &AgentConfig, screen_on: bool, app_label: String) -> Self {
        Self {
            secret: config.secret.clone(),
            device_id: config.device_id,
            screen_on,
            app_label,
        }
    }
}

/// Classification of a single send attempt. Retry scheduling belongs to the
/// job layer; the reporter only has to get this classification right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    /// Transient: transport error or a non-2xx response. Worth retrying.
    RetryableFailure { reason: String },
    /// Nothing to retry: incomplete config or an unusable endpoint URL.
    FatalFailure { reason: String },
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    client: Client,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// One POST attempt, no retries. Config validation happens first so an
    /// unconfigured agent never touches the network.
    pub async fn send(&self, config: &AgentConfig, report: &StatusReport) -> SendOutcome {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return SendOutcome::FatalFailure {
                reason: format!("config missing: {}", missing.join(", ")),
            };
        }

        let url = match Url::parse(&config.endpoint_url) {
            Ok(url) => url,
            Err(err) => {
                return SendOutcome::FatalFailure {
                    reason: format!("invalid endpoint URL {}: {err}", config.endpoint_url),
                };
            }
        };

        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .json(report)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => SendOutcome::Success,
            Ok(response) => SendOutcome::RetryableFailure {
                reason: format!("collector returned {}", response.status()),
            },
            Err(err) => SendOutcome::RetryableFailure {
                reason: format!("transport error: {err}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SendOutcome, StatusReport, StatusReporter};
    use crate::config::AgentConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(url: &str) -> AgentConfig {
        AgentConfig {
            endpoint_url: url.to_string(),
            secret: "s".to_string(),
            device_id: 7,
        }
    }

    /// Accept one connection, answer with the given status line, and hand
    /// back whatever the client sent.
    async fn one_shot_server(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            // Keep reading until the JSON body's closing brace; headers and
            // body may arrive in separate segments.
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.expect("read request");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if request.ends_with(b"}") {
                    break;
                }
            }
            socket
                .write_all(
                    format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .as_bytes(),
                )
                .await
                .expect("write response");
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}/report"), handle)
    }

    #[test]
    fn serializes_to_the_collector_wire_format() {
        let report = StatusReport {
            secret: "s".to_string(),
            device_id: 7,
            screen_on: true,
            app_label: "Mail".to_string(),
        };
        let json = serde_json::to_string(&report).expect("serialize");
        assert_eq!(json, r#"{"secret":"s","device":7,"status":1,"app":"Mail"}"#);

        let report = StatusReport {
            screen_on: false,
            ..report
        };
        let json = serde_json::to_string(&report).expect("serialize");
        assert_eq!(json, r#"{"secret":"s","device":7,"status":0,"app":"Mail"}"#);
    }

    #[tokio::test]
    async fn missing_secret_is_fatal_without_network_io() {
        // The endpoint is a bound listener that would panic on any accept.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let guard = tokio::spawn(async move {
            if listener.accept().await.is_ok() {
                panic!("reporter must not contact the network with incomplete config");
            }
        });

        let mut config = config(&format!("http://{addr}/report"));
        config.secret = String::new();
        let report = StatusReport::new(&config, true, "Mail".to_string());

        let outcome = StatusReporter::new().send(&config, &report).await;
        assert!(matches!(
            outcome,
            SendOutcome::FatalFailure { ref reason } if reason.contains("secret")
        ));

        guard.abort();
        let _ = guard.await;
    }

    #[tokio::test]
    async fn two_hundred_is_success() {
        let (url, server) = one_shot_server("HTTP/1.1 200 OK").await;
        let config = config(&url);
        let report = StatusReport::new(&config, true, "Mail".to_string());

        let outcome = StatusReporter::new().send(&config, &report).await;
        assert_eq!(outcome, SendOutcome::Success);

        let request = server.await.expect("server task");
        assert!(request.starts_with("POST /report"));
        assert!(request.contains(r#"{"secret":"s","device":7,"status":1,"app":"Mail"}"#));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let (url, server) = one_shot_server("HTTP/1.1 503 Service Unavailable").await;
        let config = config(&url);
        let report = StatusReport::new(&config, false, String::new());

        let outcome = StatusReporter::new().send(&config, &report).await;
        assert!(matches!(
            outcome,
            SendOutcome::RetryableFailure { ref reason } if reason.contains("503")
        ));
        let _ = server.await;
    }

    #[tokio::test]
    async fn connection_refused_is_retryable() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let config = config(&format!("http://{addr}/report"));
        let report = StatusReport::new(&config, true, "Mail".to_string());

        let outcome = StatusReporter::new().send(&config, &report).await;
        assert!(matches!(outcome, SendOutcome::RetryableFailure { .. }));
    }

    #[tokio::test]
    async fn malformed_url_is_fatal() {
        let config = config("not a url");
        let report = StatusReport::new(&config, true, String::new());

        let outcome = StatusReporter::new().send(&config, &report).await;
        assert!(matches!(outcome, SendOutcome::FatalFailure { .. }));
    }
}
