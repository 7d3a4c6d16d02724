// Scripted fakes for the platform seams. Test-only.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::http::{BodyReader, HttpResponse, HttpTransport, RequestOptions, TransportError};
use crate::image::AppDescriptor;
use crate::platform::{Connectivity, Device};

pub struct RecordedRequest {
    pub url: String,
    pub options: RequestOptions,
}

pub enum Script {
    Respond {
        status: u16,
        content_length: Option<u64>,
        body: Vec<u8>,
        /// Peer closes cleanly after this many bytes.
        close_after: Option<usize>,
        /// Error raised once the body is exhausted (or `close_after` is hit).
        tail_error: Option<TransportError>,
    },
    Fail(TransportError),
}

impl Script {
    pub fn ok(body: Vec<u8>) -> Self {
        Script::Respond {
            status: 200,
            content_length: Some(body.len() as u64),
            body,
            close_after: None,
            tail_error: None,
        }
    }

    pub fn status(code: u16) -> Self {
        Script::Respond {
            status: code,
            content_length: Some(0),
            body: Vec::new(),
            close_after: None,
            tail_error: None,
        }
    }

    pub fn with_length(mut self, length: Option<u64>) -> Self {
        if let Script::Respond { content_length, .. } = &mut self {
            *content_length = length;
        }
        self
    }

    pub fn close_after(mut self, bytes: usize) -> Self {
        if let Script::Respond { close_after, .. } = &mut self {
            *close_after = Some(bytes);
        }
        self
    }

    pub fn fail_after(mut self, bytes: usize, error: TransportError) -> Self {
        if let Script::Respond { close_after, tail_error, .. } = &mut self {
            *close_after = Some(bytes);
            *tail_error = Some(error);
        }
        self
    }
}

pub struct ScriptedBody {
    data: Vec<u8>,
    pos: usize,
    stop_at: usize,
    tail_error: Option<TransportError>,
    largest_read: Rc<Cell<usize>>,
}

impl BodyReader for ScriptedBody {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.largest_read.set(self.largest_read.get().max(buf.len()));

        if self.pos >= self.stop_at {
            return match self.tail_error.take() {
                Some(err) => Err(err),
                None => Ok(0),
            };
        }

        let n = buf.len().min(self.stop_at - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: HashMap<String, VecDeque<Script>>,
    requests: Vec<RecordedRequest>,
    largest_read: Rc<Cell<usize>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, url: &str, script: Script) {
        self.scripts.entry(url.to_string()).or_default().push_back(script);
    }

    pub fn requests(&self) -> &[RecordedRequest] {
        &self.requests
    }

    pub fn requested(&self, url: &str) -> usize {
        self.requests.iter().filter(|r| r.url == url).count()
    }

    /// Largest buffer any body read was asked to fill.
    pub fn largest_read(&self) -> usize {
        self.largest_read.get()
    }
}

impl HttpTransport for ScriptedTransport {
    type Body = ScriptedBody;

    fn get(
        &mut self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse<ScriptedBody>, TransportError> {
        self.requests.push(RecordedRequest {
            url: url.to_string(),
            options: *options,
        });

        let script = self
            .scripts
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| TransportError::Connect(format!("no route to {}", url)))?;

        match script {
            Script::Fail(err) => Err(err),
            Script::Respond {
                status,
                content_length,
                body,
                close_after,
                tail_error,
            } => {
                let stop_at = close_after.unwrap_or(body.len()).min(body.len());
                Ok(HttpResponse {
                    status,
                    content_length,
                    body: ScriptedBody {
                        data: body,
                        pos: 0,
                        stop_at,
                        tail_error,
                        largest_read: Rc::clone(&self.largest_read),
                    },
                })
            }
        }
    }
}

#[derive(Default)]
pub struct FakeDevice {
    pub yields: usize,
    pub restarts: usize,
}

impl Device for FakeDevice {
    fn yield_now(&mut self) {
        self.yields += 1;
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }
}

pub struct FakeLink {
    pub connected: bool,
}

impl Connectivity for FakeLink {
    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Deterministic pseudo-random firmware image.
pub fn firmware_image(len: usize) -> Vec<u8> {
    (0..len).map(filler).collect()
}

/// Same, stamped with `version` in its app descriptor.
pub fn app_image(version: &str, len: usize) -> Vec<u8> {
    AppDescriptor {
        version: version.into(),
        project_name: "esp32-ota-updater".into(),
    }
    .build_image(len, filler)
}

fn filler(i: usize) -> u8 {
    (i.wrapping_mul(31) ^ (i >> 3)) as u8
}
