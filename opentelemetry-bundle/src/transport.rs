//! Replay transports for spooled entries, with OTLP error classification.
//!
//! The retry driver is transport-agnostic: it drains entries through the
//! [`Transport`] seam and only distinguishes retriable from terminal
//! failures. [`HttpTransport`] replays HTTP entries as plain POSTs;
//! [`GrpcTransport`] replays gRPC entries through one-shot OTLP collector
//! clients on a private current-thread runtime. Both run on the driver's own
//! thread, never on the caller's.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use prost::Message as _;
use thiserror::Error;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, ClientTlsConfig};

use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;

use crate::error::Error;
use crate::spool::SpoolEntry;

/// gRPC method path for span exports.
pub const TRACES_EXPORT_PATH: &str = "/opentelemetry.proto.collector.trace.v1.TraceService/Export";
/// gRPC method path for log exports.
pub const LOGS_EXPORT_PATH: &str = "/opentelemetry.proto.collector.logs.v1.LogsService/Export";
/// gRPC method path for metric exports.
pub const METRICS_EXPORT_PATH: &str =
    "/opentelemetry.proto.collector.metrics.v1.MetricsService/Export";

// Server-provided throttling hints are honored but never beyond this bound.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// Outcome classification of a failed send.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Worth retrying: the entry stays spooled and backoff applies.
    #[error("{reason}")]
    Retriable {
        /// Human-readable failure description, including the
        /// `remote status NNN` marker for remote rejections.
        reason: String,
        /// Server-provided delay hint; overrides backoff when present.
        retry_after: Option<Duration>,
    },

    /// Unrecoverable for this payload: retrying would block newer telemetry
    /// behind a permanent rejection.
    #[error("{reason}")]
    Terminal {
        /// Human-readable failure description.
        reason: String,
    },
}

impl TransportError {
    pub(crate) fn retriable(reason: impl Into<String>) -> Self {
        TransportError::Retriable {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub(crate) fn terminal(reason: impl Into<String>) -> Self {
        TransportError::Terminal {
            reason: reason.into(),
        }
    }
}

/// One delivery attempt for one spooled entry.
pub trait Transport: Send {
    /// Attempt to deliver `entry` to the backend.
    fn send(&mut self, entry: &SpoolEntry) -> Result<(), TransportError>;
}

/// Classify a non-success HTTP status per the OTLP retry rules.
pub(crate) fn classify_http_status(status: u16, retry_after: Option<&str>) -> TransportError {
    let reason = format!("remote status {status}");
    match status {
        429 => TransportError::Retriable {
            reason,
            retry_after: retry_after.and_then(parse_retry_after_secs),
        },
        500..=599 => TransportError::retriable(reason),
        400..=499 => TransportError::terminal(reason),
        // Anything else (redirect loops, proxy oddities) is worth retrying.
        _ => TransportError::retriable(reason),
    }
}

fn parse_retry_after_secs(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Classify a gRPC status per the OTLP retry rules.
pub(crate) fn classify_grpc_status(status: &tonic::Status) -> TransportError {
    use tonic::Code;

    let reason = format!("remote status {:?}: {}", status.code(), status.message());
    match status.code() {
        Code::Cancelled
        | Code::DeadlineExceeded
        | Code::ResourceExhausted
        | Code::Aborted
        | Code::OutOfRange
        | Code::Unavailable
        | Code::DataLoss => TransportError::retriable(reason),
        _ => TransportError::terminal(reason),
    }
}

fn try_metadata(headers: &HashMap<String, String>) -> Result<MetadataMap, String> {
    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_str(name).map_err(|_| name.clone())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| name.clone())?;
        header_map.insert(header_name, header_value);
    }
    Ok(MetadataMap::from_headers(header_map))
}

/// Build gRPC request metadata at setup time; invalid headers are a
/// configuration error.
pub(crate) fn setup_metadata(headers: &HashMap<String, String>) -> Result<MetadataMap, Error> {
    try_metadata(headers).map_err(|name| Error::InvalidHeader { name })
}

/// Replays HTTP entries as POST requests.
#[derive(Debug)]
pub struct HttpTransport {
    timeout: Duration,
    // Built lazily so the blocking client is always constructed on the
    // driver thread, never inside a host async runtime.
    client: Option<reqwest::blocking::Client>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        HttpTransport {
            timeout,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&reqwest::blocking::Client, TransportError> {
        match &mut self.client {
            Some(client) => Ok(client),
            slot => {
                let built = reqwest::blocking::Client::builder()
                    .build()
                    .map_err(|err| {
                        TransportError::retriable(format!("http client init failed: {err}"))
                    })?;
                Ok(slot.insert(built))
            }
        }
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, entry: &SpoolEntry) -> Result<(), TransportError> {
        let timeout = self.timeout;
        let client = self.client()?;
        let mut request = client
            .post(&entry.meta.target)
            .timeout(timeout)
            .body(entry.body.clone());
        for (name, value) in &entry.meta.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = &entry.meta.content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type.as_str());
        }

        let response = request
            .send()
            .map_err(|err| TransportError::retriable(format!("request failed: {err}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        Err(classify_http_status(status.as_u16(), retry_after.as_deref()))
    }
}

struct GrpcState {
    runtime: tokio::runtime::Runtime,
    channel: Channel,
}

/// Replays gRPC entries through one-shot OTLP collector clients.
pub struct GrpcTransport {
    origin: String,
    timeout: Duration,
    state: Option<GrpcState>,
}

impl GrpcTransport {
    /// `origin` is a bare scheme+authority (`http://host:4317`); the method
    /// path comes from each entry.
    pub fn new(origin: String, timeout: Duration) -> Self {
        GrpcTransport {
            origin,
            timeout,
            state: None,
        }
    }

    fn state(&mut self) -> Result<&GrpcState, TransportError> {
        match &mut self.state {
            Some(state) => Ok(state),
            slot => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|err| {
                        TransportError::retriable(format!("grpc runtime init failed: {err}"))
                    })?;
                let endpoint = Channel::from_shared(self.origin.clone()).map_err(|err| {
                    TransportError::terminal(format!(
                        "invalid grpc endpoint {:?}: {err}",
                        self.origin
                    ))
                })?;
                let endpoint = if self.origin.starts_with("https://") {
                    endpoint
                        .tls_config(ClientTlsConfig::new().with_native_roots())
                        .map_err(|err| {
                            TransportError::retriable(format!("grpc tls config failed: {err}"))
                        })?
                } else {
                    endpoint
                };
                let _guard = runtime.enter();
                let channel = endpoint
                    .timeout(self.timeout)
                    .connect_timeout(self.timeout)
                    .connect_lazy();
                Ok(slot.insert(GrpcState { runtime, channel }))
            }
        }
    }
}

impl std::fmt::Debug for GrpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("origin", &self.origin)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Transport for GrpcTransport {
    fn send(&mut self, entry: &SpoolEntry) -> Result<(), TransportError> {
        let metadata = try_metadata(&entry.meta.headers)
            .map_err(|name| TransportError::terminal(format!("invalid header {name:?}")))?;
        let state = self.state()?;

        let outcome: Result<(), tonic::Status> = match entry.meta.target.as_str() {
            TRACES_EXPORT_PATH => {
                let message =
                    ExportTraceServiceRequest::decode(entry.body.as_slice()).map_err(|err| {
                        TransportError::terminal(format!("undecodable trace payload: {err}"))
                    })?;
                let mut request = tonic::Request::new(message);
                *request.metadata_mut() = metadata;
                let mut client = TraceServiceClient::new(state.channel.clone());
                state.runtime.block_on(client.export(request)).map(|_| ())
            }
            LOGS_EXPORT_PATH => {
                let message =
                    ExportLogsServiceRequest::decode(entry.body.as_slice()).map_err(|err| {
                        TransportError::terminal(format!("undecodable log payload: {err}"))
                    })?;
                let mut request = tonic::Request::new(message);
                *request.metadata_mut() = metadata;
                let mut client = LogsServiceClient::new(state.channel.clone());
                state.runtime.block_on(client.export(request)).map(|_| ())
            }
            METRICS_EXPORT_PATH => {
                let message =
                    ExportMetricsServiceRequest::decode(entry.body.as_slice()).map_err(|err| {
                        TransportError::terminal(format!("undecodable metric payload: {err}"))
                    })?;
                let mut request = tonic::Request::new(message);
                *request.metadata_mut() = metadata;
                let mut client = MetricsServiceClient::new(state.channel.clone());
                state.runtime.block_on(client.export(request)).map(|_| ())
            }
            other => {
                return Err(TransportError::terminal(format!(
                    "unknown grpc export method {other:?}"
                )))
            }
        };

        outcome.map_err(|status| classify_grpc_status(&status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::EntryMeta;
    use crate::Protocol;
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;

    #[test]
    fn http_status_classification() {
        assert!(matches!(
            classify_http_status(503, None),
            TransportError::Retriable { .. }
        ));
        assert!(matches!(
            classify_http_status(429, None),
            TransportError::Retriable {
                retry_after: None,
                ..
            }
        ));
        assert!(matches!(
            classify_http_status(429, Some("30")),
            TransportError::Retriable {
                retry_after: Some(delay),
                ..
            } if delay == Duration::from_secs(30)
        ));
        // Hints beyond the cap are clamped.
        assert!(matches!(
            classify_http_status(429, Some("900")),
            TransportError::Retriable {
                retry_after: Some(delay),
                ..
            } if delay == MAX_RETRY_AFTER
        ));
        assert!(matches!(
            classify_http_status(401, None),
            TransportError::Terminal { .. }
        ));
        assert!(matches!(
            classify_http_status(400, None),
            TransportError::Terminal { .. }
        ));
    }

    #[test]
    fn http_classification_carries_marker() {
        let err = classify_http_status(503, None);
        assert!(err.to_string().contains("remote status 503"));
        let err = classify_http_status(401, None);
        assert!(err.to_string().contains("remote status 401"));
    }

    #[test]
    fn grpc_status_classification() {
        assert!(matches!(
            classify_grpc_status(&tonic::Status::unavailable("down")),
            TransportError::Retriable { .. }
        ));
        assert!(matches!(
            classify_grpc_status(&tonic::Status::deadline_exceeded("slow")),
            TransportError::Retriable { .. }
        ));
        assert!(matches!(
            classify_grpc_status(&tonic::Status::invalid_argument("bad")),
            TransportError::Terminal { .. }
        ));
        assert!(matches!(
            classify_grpc_status(&tonic::Status::unauthenticated("who")),
            TransportError::Terminal { .. }
        ));
        assert!(matches!(
            classify_grpc_status(&tonic::Status::permission_denied("no")),
            TransportError::Terminal { .. }
        ));
    }

    /// Minimal canned-response HTTP server: accepts one connection per
    /// status, reads the full request, answers with an empty body.
    fn serve_statuses(statuses: Vec<u16>) -> (String, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            for status in statuses {
                let (mut stream, _) = listener.accept().unwrap();
                read_request(&mut stream);
                let response = format!("HTTP/1.1 {status} X\r\ncontent-length: 0\r\n\r\n");
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        (format!("http://{addr}/v1/traces"), handle)
    }

    fn read_request(stream: &mut std::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap();
            data.extend_from_slice(&buf[..n]);
            if let Some(header_end) = find_header_end(&data) {
                let headers = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
                let body_len = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= header_end + body_len {
                    return;
                }
            }
            if n == 0 {
                return;
            }
        }
    }

    fn find_header_end(data: &[u8]) -> Option<usize> {
        data.windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|pos| pos + 4)
    }

    fn entry_for(target: &str) -> SpoolEntry {
        SpoolEntry {
            seq: 0,
            meta: EntryMeta {
                protocol: Protocol::Http,
                target: target.to_owned(),
                headers: HashMap::new(),
                content_type: Some("application/x-protobuf".to_owned()),
            },
            body: b"x".to_vec(),
        }
    }

    #[test]
    fn http_transport_reports_remote_status() {
        let (url, server) = serve_statuses(vec![503, 200]);
        let mut transport = HttpTransport::new(Duration::from_secs(5));

        let err = transport.send(&entry_for(&url)).unwrap_err();
        assert!(err.to_string().contains("remote status 503"));
        assert!(matches!(err, TransportError::Retriable { .. }));

        transport.send(&entry_for(&url)).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn http_transport_network_error_is_retriable() {
        // Nothing listens here.
        let mut transport = HttpTransport::new(Duration::from_millis(500));
        let err = transport
            .send(&entry_for("http://127.0.0.1:9/v1/traces"))
            .unwrap_err();
        assert!(matches!(err, TransportError::Retriable { .. }));
    }

    #[test]
    fn unknown_grpc_method_is_terminal() {
        let mut transport = GrpcTransport::new("http://127.0.0.1:4317".to_owned(), Duration::from_secs(1));
        let entry = SpoolEntry {
            seq: 0,
            meta: EntryMeta {
                protocol: Protocol::Grpc,
                target: "/not.a.known.Service/Export".to_owned(),
                headers: HashMap::new(),
                content_type: Some("application/grpc".to_owned()),
            },
            body: Vec::new(),
        };
        assert!(matches!(
            transport.send(&entry),
            Err(TransportError::Terminal { .. })
        ));
    }
}
