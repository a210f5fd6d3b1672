//! Pluggable HTTP client that diverts OTLP requests into the spool.
//!
//! The OTLP HTTP exporters accept any [`HttpClient`] implementation, which is
//! exactly the seam the durable path needs: in spooled mode the exporter
//! builds its request as usual, and instead of hitting the network we persist
//! it and answer with a synthetic `202 Accepted` so the SDK considers the
//! batch delivered. In direct mode the client forwards to a real blocking
//! client and reports non-success statuses out of band before handing the
//! error back to the SDK unmasked.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use opentelemetry_http::{HttpClient, HttpError};

use crate::diag;
use crate::spool::{EntryMeta, Spool};
use crate::{Protocol, Signal};

enum Mode {
    Spooled { spool: Spool },
    Direct { inner: StandardHttpClient },
}

/// [`HttpClient`] handed to the OTLP HTTP exporter builders.
pub struct SpoolHttpClient {
    signal: Signal,
    mode: Mode,
}

impl SpoolHttpClient {
    /// Divert every request into `spool`; the retry driver delivers it.
    pub fn spooled(spool: Spool, signal: Signal) -> Self {
        SpoolHttpClient {
            signal,
            mode: Mode::Spooled { spool },
        }
    }

    /// Forward requests synchronously, reporting failures per signal.
    pub fn direct(signal: Signal, timeout: Duration) -> Self {
        SpoolHttpClient {
            signal,
            mode: Mode::Direct {
                inner: StandardHttpClient::new(signal, timeout),
            },
        }
    }

    fn enqueue(&self, spool: &Spool, request: Request<Bytes>) -> Result<u64, HttpError> {
        let (parts, body) = request.into_parts();

        let mut headers = HashMap::new();
        let mut content_type = None;
        for (name, value) in &parts.headers {
            let Ok(value) = value.to_str() else {
                // OTLP export headers are ASCII; anything else cannot be
                // restated from JSON metadata and is dropped here.
                continue;
            };
            if name == CONTENT_TYPE {
                content_type = Some(value.to_owned());
            } else {
                headers.insert(name.as_str().to_owned(), value.to_owned());
            }
        }

        let meta = EntryMeta {
            protocol: Protocol::Http,
            target: parts.uri.to_string(),
            headers,
            content_type,
        };
        spool.enqueue(&meta, &body).map_err(|err| {
            diag::error(self.signal, Some(Protocol::Http), "spool", &err);
            HttpError::from(err)
        })
    }
}

impl fmt::Debug for SpoolHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Spooled { .. } => "spooled",
            Mode::Direct { .. } => "direct",
        };
        f.debug_struct("SpoolHttpClient")
            .field("signal", &self.signal)
            .field("mode", &mode)
            .finish()
    }
}

#[async_trait]
impl HttpClient for SpoolHttpClient {
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        match &self.mode {
            Mode::Spooled { spool } => {
                self.enqueue(spool, request)?;
                Ok(Response::builder()
                    .status(StatusCode::ACCEPTED)
                    .body(Bytes::new())?)
            }
            Mode::Direct { inner } => inner.send(request),
        }
    }
}

/// Blocking passthrough client used by the direct (non-spooled) path.
pub(crate) struct StandardHttpClient {
    signal: Signal,
    timeout: Duration,
    // Built on first use so construction never happens during setup inside a
    // host async runtime.
    client: std::sync::OnceLock<reqwest::blocking::Client>,
}

impl StandardHttpClient {
    pub(crate) fn new(signal: Signal, timeout: Duration) -> Self {
        StandardHttpClient {
            signal,
            timeout,
            client: std::sync::OnceLock::new(),
        }
    }

    fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let client = match self.client.get() {
            Some(client) => client,
            None => {
                let built = reqwest::blocking::Client::builder().build()?;
                self.client.get_or_init(|| built)
            }
        };

        let mut outbound = reqwest::blocking::Request::try_from(request)?;
        *outbound.timeout_mut() = Some(self.timeout);

        let response = client.execute(outbound).inspect_err(|err| {
            diag::error(self.signal, Some(Protocol::Http), "export", err);
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?;
        if !status.is_success() {
            let reason = format!("remote status {}", status.as_u16());
            diag::error(self.signal, Some(Protocol::Http), "export", &reason);
            return Err(reason.into());
        }

        let mut rebuilt = Response::builder().status(status).body(body)?;
        *rebuilt.headers_mut() = headers;
        Ok(rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_executor::block_on;
    use tempfile::TempDir;

    fn proto_request(url: &str) -> Request<Bytes> {
        Request::builder()
            .method(http::Method::POST)
            .uri(url)
            .header(CONTENT_TYPE, "application/x-protobuf")
            .header("Authorization", "Bearer tok")
            .body(Bytes::from_static(b"span batch bytes"))
            .unwrap()
    }

    #[test]
    fn spooled_mode_returns_accepted_and_persists() {
        let dir = TempDir::new().unwrap();
        let spool = Spool::open(dir.path(), Signal::Traces).unwrap();
        let client = SpoolHttpClient::spooled(spool.clone(), Signal::Traces);

        let response = block_on(client.send_bytes(proto_request(
            "http://collector:4318/v1/traces",
        )))
        .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let entry = spool.peek_oldest().unwrap().unwrap();
        assert_eq!(entry.meta.protocol, Protocol::Http);
        assert_eq!(entry.meta.target, "http://collector:4318/v1/traces");
        assert_eq!(
            entry.meta.content_type.as_deref(),
            Some("application/x-protobuf")
        );
        assert_eq!(
            entry.meta.headers.get("authorization").map(String::as_str),
            Some("Bearer tok")
        );
        assert_eq!(entry.body, b"span batch bytes");
    }

    #[test]
    fn spooled_mode_surfaces_enqueue_failure() {
        let installed = diag::capture::Installed::install();
        let dir = TempDir::new().unwrap();
        let spool = Spool::open(dir.path(), Signal::Traces).unwrap();
        let client = SpoolHttpClient::spooled(spool.clone(), Signal::Traces);

        spool.close();
        let result = block_on(client.send_bytes(proto_request(
            "http://collector:4318/v1/traces",
        )));
        assert!(result.is_err());
        assert!(installed.contents().contains("kind=spool"));
    }
}
