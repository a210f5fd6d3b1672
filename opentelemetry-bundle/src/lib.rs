//! # OpenTelemetry Bundle
//!
//! A batteries-included telemetry bundle that wires a service's logs, traces,
//! and metrics to OTLP-compatible backends — and keeps the data safe while
//! the backend is not reachable. One composite [`TelemetryConfig`] builds all
//! signal pipelines around a single shared resource identity.
//!
//! The piece that distinguishes this crate from plain exporter setup is the
//! **persistent spool**: outbound OTLP payloads are written to a crash-safe
//! on-disk queue before delivery, and a per-signal retry driver replays them
//! with capped exponential backoff until the backend accepts them. Process
//! restarts, collector deploys, and transient outages stop costing telemetry.
//!
//! Delivery is at-least-once by design: a payload is removed from the spool
//! only after the backend acknowledges it, so a crash between delivery and
//! acknowledgment replays the payload. Backends are expected to tolerate
//! duplicates; this crate never deduplicates.
//!
//! ## Quickstart
//!
//! ```no_run
//! use opentelemetry_bundle::{Protocol, Telemetry, TelemetryConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = TelemetryConfig::default();
//!     config.resource.service_name = "checkout".to_owned();
//!     config.resource.service_version = Some("1.4.2".to_owned());
//!
//!     config.traces.enabled = true;
//!     config.traces.endpoint = Some("http://collector:4318".to_owned());
//!     config.traces.protocol = Protocol::Http;
//!     config.traces.use_global = true;
//!
//!     config.metrics.enabled = true;
//!     config.metrics.endpoint = Some("collector:4317".to_owned());
//!     config.metrics.insecure = true;
//!
//!     let mut telemetry = Telemetry::new(config)?;
//!     // ... the application runs, emitting through the global providers ...
//!     telemetry.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Spooling model
//!
//! Each enabled signal owns an independent spool directory (one writer, one
//! reader, enforced by a file lock) and one retry driver thread. Within a
//! signal, delivery order equals enqueue order; across signals there is no
//! ordering. See the [`spool`] and [`retry`] modules for the durability and
//! backoff contracts.

use std::fmt;
use std::time::Duration;

use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod config;
pub mod creds;
pub mod diag;
pub mod endpoint;
pub mod error;
pub mod export;
mod logs;
mod metric;
mod pipeline;
pub mod profile;
pub mod resource;
pub mod retry;
mod span;
pub mod spool;
pub mod transport;

pub use config::{ProfilesConfig, ResourceConfig, SignalConfig, TelemetryConfig};
pub use creds::Credentials;
pub use endpoint::Endpoint;
pub use error::Error;

use retry::{RetryHandle, DEFAULT_SHUTDOWN_GRACE};

/// One of the three delivery signals, used to tag spools and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Logs,
    Traces,
    Metrics,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Logs => "logs",
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire protocol of one signal pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// OTLP over HTTP (binary protobuf).
    Http,
    /// OTLP over gRPC.
    Grpc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Grpc => "grpc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The constructed telemetry pipelines.
///
/// Owns the signal providers and the retry drivers draining their spools.
/// Dropping the handle without calling [`shutdown`](Telemetry::shutdown)
/// leaves undelivered entries safely on disk for the next start.
#[derive(Debug)]
pub struct Telemetry {
    resource: Resource,
    profiles: ProfilesConfig,
    logger_provider: Option<SdkLoggerProvider>,
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    drivers: Vec<RetryHandle>,
}

impl Telemetry {
    /// Build every enabled signal pipeline.
    ///
    /// Fails fast on configuration problems: missing service name, missing
    /// or malformed endpoints, unusable spool directories. Runtime delivery
    /// failures never surface here.
    pub fn new(mut config: TelemetryConfig) -> Result<Telemetry, Error> {
        let resource = resource::build_resource(config.resource_settings())?;
        let link_profiles = config.profiles.enabled && config.traces.enabled;
        let mut drivers = Vec::new();

        let logger_provider = if config.logs.enabled {
            let built = logs::build(&config.logs, &resource)?;
            drivers.extend(built.retry);
            Some(built.provider)
        } else {
            None
        };

        let tracer_provider = if config.traces.enabled {
            let built = span::build(&config.traces, &resource, link_profiles)?;
            drivers.extend(built.retry);
            Some(built.provider)
        } else {
            None
        };

        let meter_provider = if config.metrics.enabled {
            let built = metric::build(&config.metrics, &resource)?;
            drivers.extend(built.retry);
            Some(built.provider)
        } else {
            None
        };

        Ok(Telemetry {
            resource,
            profiles: config.profiles,
            logger_provider,
            tracer_provider,
            meter_provider,
            drivers,
        })
    }

    /// The composed resource identity stamped on every signal.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Settings for the external continuous-profiler agent.
    pub fn profiles(&self) -> &ProfilesConfig {
        &self.profiles
    }

    pub fn logger_provider(&self) -> Option<&SdkLoggerProvider> {
        self.logger_provider.as_ref()
    }

    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.tracer_provider.as_ref()
    }

    pub fn meter_provider(&self) -> Option<&SdkMeterProvider> {
        self.meter_provider.as_ref()
    }

    /// Shut down with the default 5 s driver grace.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.shutdown_with_grace(DEFAULT_SHUTDOWN_GRACE)
    }

    /// Flush and shut down the providers, then stop the retry drivers.
    ///
    /// Providers go first so their final batches still reach the spool; each
    /// driver then gets up to `grace` to finish its in-flight send. Whatever
    /// is still undelivered stays on disk and is replayed on the next start.
    /// Idempotent.
    pub fn shutdown_with_grace(&mut self, grace: Duration) -> Result<(), Error> {
        let mut failures = Vec::new();

        if let Some(provider) = self.logger_provider.take() {
            if let Err(err) = provider.shutdown() {
                failures.push(format!("logs: {err}"));
            }
        }
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(err) = provider.shutdown() {
                failures.push(format!("traces: {err}"));
            }
        }
        if let Some(provider) = self.meter_provider.take() {
            if let Err(err) = provider.shutdown() {
                failures.push(format!("metrics: {err}"));
            }
        }

        for driver in self.drivers.drain(..) {
            driver.shutdown(grace);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Shutdown(failures.join("; ")))
        }
    }
}
