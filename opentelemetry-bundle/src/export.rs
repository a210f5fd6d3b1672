//! Diagnostic skin over every exporter.
//!
//! One wrapper per exporter trait, applied in every mode: each failed send is
//! reported through [`diag`](crate::diag) tagged with its signal and
//! protocol, then returned to the SDK unmasked so its own handling still
//! applies.

use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::{LogBatch, LogExporter};
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::Temporality;
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use opentelemetry_sdk::Resource;

use crate::diag;
use crate::{Protocol, Signal};

/// Span exporter wrapper; reports failed exports for the traces signal.
#[derive(Debug)]
pub struct InstrumentedSpanExporter<E> {
    inner: E,
    protocol: Protocol,
}

impl<E> InstrumentedSpanExporter<E> {
    pub fn new(inner: E, protocol: Protocol) -> Self {
        InstrumentedSpanExporter { inner, protocol }
    }
}

impl<E: SpanExporter> SpanExporter for InstrumentedSpanExporter<E> {
    async fn export(&self, batch: Vec<SpanData>) -> OTelSdkResult {
        self.inner.export(batch).await.inspect_err(|err| {
            diag::error(Signal::Traces, Some(self.protocol), "export", err);
        })
    }

    fn force_flush(&mut self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown_with_timeout(&mut self, timeout: Duration) -> OTelSdkResult {
        self.inner.shutdown_with_timeout(timeout)
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// Log exporter wrapper; reports failed exports for the logs signal.
#[derive(Debug)]
pub struct InstrumentedLogExporter<E> {
    inner: E,
    protocol: Protocol,
}

impl<E> InstrumentedLogExporter<E> {
    pub fn new(inner: E, protocol: Protocol) -> Self {
        InstrumentedLogExporter { inner, protocol }
    }
}

impl<E: LogExporter> LogExporter for InstrumentedLogExporter<E> {
    async fn export(&self, batch: LogBatch<'_>) -> OTelSdkResult {
        self.inner.export(batch).await.inspect_err(|err| {
            diag::error(Signal::Logs, Some(self.protocol), "export", err);
        })
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// Metric exporter wrapper; reports failed exports for the metrics signal.
#[derive(Debug)]
pub struct InstrumentedMetricExporter<E> {
    inner: E,
    protocol: Protocol,
}

impl<E> InstrumentedMetricExporter<E> {
    pub fn new(inner: E, protocol: Protocol) -> Self {
        InstrumentedMetricExporter { inner, protocol }
    }
}

impl<E: PushMetricExporter> PushMetricExporter for InstrumentedMetricExporter<E> {
    async fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult {
        self.inner.export(metrics).await.inspect_err(|err| {
            diag::error(Signal::Metrics, Some(self.protocol), "export", err);
        })
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.inner.shutdown_with_timeout(timeout)
    }

    fn temporality(&self) -> Temporality {
        self.inner.temporality()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_executor::block_on;
    use opentelemetry_sdk::error::OTelSdkError;

    #[derive(Debug)]
    struct FailingSpanExporter;

    impl SpanExporter for FailingSpanExporter {
        async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
            Err(OTelSdkError::InternalFailure("remote status 503".to_owned()))
        }
    }

    #[test]
    fn failed_export_is_reported_and_returned() {
        let installed = diag::capture::Installed::install();
        let exporter = InstrumentedSpanExporter::new(FailingSpanExporter, Protocol::Grpc);

        let result = block_on(exporter.export(Vec::new()));
        assert!(result.is_err());

        let output = installed.contents();
        assert!(output.contains("signal=traces"));
        assert!(output.contains("protocol=grpc"));
        assert!(output.contains("remote status 503"));
    }
}
