//! The backend HTTP client capability. The backend loop talks through this
//! trait so its retry/timeout state machine can be exercised against a fake
//! transport in tests.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("response body too short to be a valid UpdateResponse")]
    ShortResponse,
    #[error("backend returned non-success status {0}")]
    BadStatus(u16),
}

pub trait HttpTransport: Send + Sync {
    /// POSTs `body` to `url` and returns the response body bytes.
    fn post(&self, url: &str, body: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// The one concrete transport this codebase ships: a blocking `reqwest`
/// client with a fixed per-request timeout, matching the backend loop's
/// wall-clock HTTP budget.
pub struct ReqwestHttpTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestHttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction with a fixed timeout does not fail");
        ReqwestHttpTransport { client }
    }
}

impl HttpTransport for ReqwestHttpTransport {
    fn post(&self, url: &str, body: &[u8]) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/octet-stream")
            .body(body.to_vec())
            .send()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::BadStatus(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        if bytes.len() < 16 {
            return Err(TransportError::ShortResponse);
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeTransport {
        calls: AtomicUsize,
        responses: Mutex<Vec<Result<Vec<u8>, TransportError>>>,
    }

    impl HttpTransport for FakeTransport {
        fn post(&self, _url: &str, _body: &[u8]) -> Result<Vec<u8>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(TransportError::Request("no more canned responses".into()));
            }
            responses.remove(0)
        }
    }

    #[test]
    fn fake_transport_drains_canned_responses_in_order() {
        let transport = FakeTransport {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(vec![Ok(vec![1u8; 20]), Err(TransportError::ShortResponse)]),
        };
        assert!(transport.post("http://x", &[]).is_ok());
        assert!(transport.post("http://x", &[]).is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }
}
