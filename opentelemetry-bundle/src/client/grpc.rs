//! Spooling exporter shims for the gRPC transport.
//!
//! tonic client stubs offer no per-request seam equivalent to the pluggable
//! HTTP client, so the durable gRPC path intercepts one level higher: these
//! exporters implement the SDK exporter traits, serialize the exact protobuf
//! request the tonic exporter would have sent, and persist it together with
//! the target method path. The retry driver replays the call through a
//! one-shot collector client.

use std::collections::HashMap;
use std::fmt;

use prost::Message as _;

use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::transform::common::tonic::ResourceAttributesWithSchema;
use opentelemetry_proto::transform::logs::tonic::group_logs_by_resource_and_scope;
use opentelemetry_proto::transform::trace::tonic::group_spans_by_resource_and_scope;

use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::logs::{LogBatch, LogExporter};
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::Temporality;
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use opentelemetry_sdk::Resource;

use crate::diag;
use crate::spool::{EntryMeta, Spool};
use crate::transport::{LOGS_EXPORT_PATH, METRICS_EXPORT_PATH, TRACES_EXPORT_PATH};
use crate::{Protocol, Signal};

const GRPC_CONTENT_TYPE: &str = "application/grpc";

fn enqueue(
    spool: &Spool,
    signal: Signal,
    target: &str,
    headers: &HashMap<String, String>,
    body: Vec<u8>,
) -> OTelSdkResult {
    let meta = EntryMeta {
        protocol: Protocol::Grpc,
        target: target.to_owned(),
        headers: headers.clone(),
        content_type: Some(GRPC_CONTENT_TYPE.to_owned()),
    };
    match spool.enqueue(&meta, &body) {
        Ok(_) => Ok(()),
        Err(err) => {
            diag::error(signal, Some(Protocol::Grpc), "spool", &err);
            Err(OTelSdkError::InternalFailure(err.to_string()))
        }
    }
}

/// Span exporter that persists serialized `ExportTraceServiceRequest`s.
pub struct SpoolSpanExporter {
    spool: Spool,
    headers: HashMap<String, String>,
    resource: ResourceAttributesWithSchema,
}

impl SpoolSpanExporter {
    pub fn new(spool: Spool, headers: HashMap<String, String>) -> Self {
        SpoolSpanExporter {
            spool,
            headers,
            resource: ResourceAttributesWithSchema::default(),
        }
    }
}

impl fmt::Debug for SpoolSpanExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpoolSpanExporter")
    }
}

impl SpanExporter for SpoolSpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> OTelSdkResult {
        let resource_spans = group_spans_by_resource_and_scope(batch, &self.resource);
        let request = ExportTraceServiceRequest { resource_spans };
        enqueue(
            &self.spool,
            Signal::Traces,
            TRACES_EXPORT_PATH,
            &self.headers,
            request.encode_to_vec(),
        )
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.resource = resource.into();
    }
}

/// Log exporter that persists serialized `ExportLogsServiceRequest`s.
pub struct SpoolLogExporter {
    spool: Spool,
    headers: HashMap<String, String>,
    resource: ResourceAttributesWithSchema,
}

impl SpoolLogExporter {
    pub fn new(spool: Spool, headers: HashMap<String, String>) -> Self {
        SpoolLogExporter {
            spool,
            headers,
            resource: ResourceAttributesWithSchema::default(),
        }
    }
}

impl fmt::Debug for SpoolLogExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpoolLogExporter")
    }
}

impl LogExporter for SpoolLogExporter {
    async fn export(&self, batch: LogBatch<'_>) -> OTelSdkResult {
        let resource_logs = group_logs_by_resource_and_scope(batch, &self.resource);
        let request = ExportLogsServiceRequest { resource_logs };
        enqueue(
            &self.spool,
            Signal::Logs,
            LOGS_EXPORT_PATH,
            &self.headers,
            request.encode_to_vec(),
        )
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.resource = resource.into();
    }
}

/// Metric exporter that persists serialized `ExportMetricsServiceRequest`s.
pub struct SpoolMetricExporter {
    spool: Spool,
    headers: HashMap<String, String>,
    temporality: Temporality,
}

impl SpoolMetricExporter {
    pub fn new(spool: Spool, headers: HashMap<String, String>, temporality: Temporality) -> Self {
        SpoolMetricExporter {
            spool,
            headers,
            temporality,
        }
    }
}

impl fmt::Debug for SpoolMetricExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpoolMetricExporter")
    }
}

impl PushMetricExporter for SpoolMetricExporter {
    async fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult {
        let request = ExportMetricsServiceRequest::from(metrics);
        enqueue(
            &self.spool,
            Signal::Metrics,
            METRICS_EXPORT_PATH,
            &self.headers,
            request.encode_to_vec(),
        )
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: std::time::Duration) -> OTelSdkResult {
        Ok(())
    }

    fn temporality(&self) -> Temporality {
        self.temporality
    }
}
