use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

/// Why a probe did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// No response within the probe timeout
    Timeout(Duration),
    /// Connection refused, reset, DNS failure and similar transport errors
    Connection(String),
    /// A response arrived but did not carry the expected status
    UnexpectedStatus { expected: u16, actual: u16 },
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout(timeout) => write!(f, "no response within {:?}", timeout),
            ProbeFailure::Connection(details) => write!(f, "connection error: {}", details),
            ProbeFailure::UnexpectedStatus { expected, actual } => {
                write!(f, "service unavailable (HTTP {}, expected {})", actual, expected)
            }
        }
    }
}

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure(ProbeFailure),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }
}

/// A bounded-time reachability check.
///
/// Implementations report every problem through [`ProbeOutcome::Failure`]
/// and never return early with an error.
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn check(&self) -> ProbeOutcome;
}

/// HTTP GET probe
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    expected_status: u16,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration, expected_status: u16) -> Result<Self> {
        // The service lives on a local VM, so proxy settings from the environment are ignored
        let client = reqwest::Client::builder().no_proxy().build()?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
            expected_status,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn classify(&self, error: reqwest::Error) -> ProbeFailure {
        if error.is_timeout() {
            ProbeFailure::Timeout(self.timeout)
        } else {
            ProbeFailure::Connection(error.to_string())
        }
    }
}

#[async_trait]
impl ServiceProbe for HttpProbe {
    async fn check(&self) -> ProbeOutcome {
        trace!("Probing {}", self.url);

        // The outer timeout also bounds connection setup and body-less stalls
        let request = self.client.get(&self.url).timeout(self.timeout).send();
        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return ProbeOutcome::Failure(self.classify(e)),
            Err(_) => return ProbeOutcome::Failure(ProbeFailure::Timeout(self.timeout)),
        };

        let status = response.status().as_u16();
        debug!("Probe of {} returned HTTP {}", self.url, status);

        if status == self.expected_status {
            ProbeOutcome::Success
        } else {
            ProbeOutcome::Failure(ProbeFailure::UnexpectedStatus {
                expected: self.expected_status,
                actual: status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer every connection with the same status line
    async fn serve(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_expected_status_is_success() {
        let url = serve("200 OK").await;
        let probe = HttpProbe::new(url, Duration::from_secs(2), 200).unwrap();

        assert_eq!(probe.check().await, ProbeOutcome::Success);
    }

    #[tokio::test]
    async fn test_unexpected_status_is_failure() {
        let url = serve("503 Service Unavailable").await;
        let probe = HttpProbe::new(url, Duration::from_secs(2), 200).unwrap();

        assert_eq!(
            probe.check().await,
            ProbeOutcome::Failure(ProbeFailure::UnexpectedStatus {
                expected: 200,
                actual: 503
            })
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new(format!("http://{}/", addr), Duration::from_secs(2), 200).unwrap();
        match probe.check().await {
            ProbeOutcome::Failure(ProbeFailure::Connection(_)) => {}
            other => panic!("Expected connection failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let probe = HttpProbe::new(format!("http://{}/", addr), Duration::from_millis(200), 200).unwrap();
        match probe.check().await {
            ProbeOutcome::Failure(ProbeFailure::Timeout(timeout)) => {
                assert_eq!(timeout, Duration::from_millis(200));
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_display() {
        let failure = ProbeFailure::UnexpectedStatus {
            expected: 200,
            actual: 502,
        };
        assert_eq!(
            failure.to_string(),
            "service unavailable (HTTP 502, expected 200)"
        );
    }
}
