/// HTTP seam used by the resolver and installer.
///
/// On the device this is backed by the ESP-IDF HTTP client; host tests use
/// scripted fakes. Every request carries an explicit timeout.
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub follow_redirects: bool,
}

impl RequestOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            follow_redirects: false,
        }
    }

    pub fn follow_redirects(mut self) -> Self {
        self.follow_redirects = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connect(String),
    Timeout,
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(reason) => write!(f, "connect failed: {}", reason),
            TransportError::Timeout => write!(f, "timed out"),
            TransportError::Io(reason) => write!(f, "i/o error: {}", reason),
        }
    }
}

impl std::error::Error for TransportError {}

/// Streaming response body.
pub trait BodyReader {
    /// Reads up to `buf.len()` bytes. `Ok(0)` means the peer closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

pub struct HttpResponse<B> {
    pub status: u16,
    /// Value of `Content-Length`, if the server sent one.
    pub content_length: Option<u64>,
    pub body: B,
}

pub trait HttpTransport {
    type Body: BodyReader;

    fn get(
        &mut self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse<Self::Body>, TransportError>;
}

/// Reads a small body to the end, stopping once it has more than `limit` bytes.
///
/// A result longer than `limit` means the body was too large; what that
/// means is up to the caller.
pub fn read_capped<B: BodyReader>(body: &mut B, limit: usize) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    while out.len() <= limit {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}
