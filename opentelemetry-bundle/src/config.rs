//! The composite configuration surface.
//!
//! One [`TelemetryConfig`] describes all four signal pipelines. The data
//! fields deserialize from any serde format; detectors, the resource
//! override, and customizers are code and are attached programmatically
//! after deserialization.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::ResourceDetector;
use opentelemetry_sdk::Resource;
use serde::Deserialize;

use crate::creds::Credentials;
use crate::resource::{ResourceCustomizer, ResourceSettings};
use crate::{Protocol, Signal};

/// Default export timeout for every signal.
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default export interval for the metrics signal.
pub const DEFAULT_METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Identity of the service emitting telemetry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Required logical service name.
    pub service_name: String,
    pub service_version: Option<String>,
    pub deployment_environment: Option<String>,
    pub service_namespace: Option<String>,
    /// Free-form resource attributes.
    pub attributes: HashMap<String, String>,
}

/// Configuration of one signal pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Whether the pipeline is constructed at all.
    pub enabled: bool,
    /// Collector endpoint; required when enabled.
    pub endpoint: Option<String>,
    /// Plaintext transport for schemeless endpoints.
    pub insecure: bool,
    /// Wire protocol for this signal.
    pub protocol: Protocol,
    /// Insert the durable spool between the SDK and the network. Defaults
    /// per signal: on for traces and metrics, off for logs.
    pub use_spool: Option<bool>,
    /// Spool directory override; defaults to a per-signal subdirectory of
    /// the user cache directory.
    pub spool_dir: Option<PathBuf>,
    /// Export interval (metrics reader cadence; 10 s when unset).
    pub export_interval: Option<Duration>,
    /// Per-attempt delivery timeout (10 s when unset).
    pub export_timeout: Option<Duration>,
    /// Backend credentials and extra headers.
    pub credentials: Credentials,
    /// Install the built provider as the process-wide global (traces and
    /// metrics; the logs API has no global registry).
    pub use_global: bool,
    /// Logs only: `true` batches records on a background thread, `false`
    /// exports synchronously from the emitting call. Orthogonal to
    /// `use_spool`.
    pub async_export: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            enabled: false,
            endpoint: None,
            insecure: false,
            protocol: Protocol::Grpc,
            use_spool: None,
            spool_dir: None,
            export_interval: None,
            export_timeout: None,
            credentials: Credentials::default(),
            use_global: false,
            async_export: true,
        }
    }
}

impl SignalConfig {
    pub(crate) fn use_spool_for(&self, signal: Signal) -> bool {
        self.use_spool.unwrap_or(match signal {
            Signal::Logs => false,
            Signal::Traces | Signal::Metrics => true,
        })
    }

    pub(crate) fn export_timeout(&self) -> Duration {
        self.export_timeout.unwrap_or(DEFAULT_EXPORT_TIMEOUT)
    }
}

/// Configuration handed to the external continuous-profiler agent.
///
/// The agent itself is not part of this crate; the bundle carries its
/// settings and, when profiling and tracing are both enabled, links spans to
/// profiles via [`profile::ProfileLinkProcessor`](crate::profile::ProfileLinkProcessor).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    pub enabled: bool,
    /// Profiler server address, e.g. `http://pyroscope:4040`.
    pub server_address: Option<String>,
    /// Static tags attached to every profile.
    pub tags: HashMap<String, String>,
}

/// The composite telemetry configuration.
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub resource: ResourceConfig,
    pub logs: SignalConfig,
    pub traces: SignalConfig,
    pub metrics: SignalConfig,
    pub profiles: ProfilesConfig,

    /// Environment detectors, applied in order after the semantic defaults.
    #[serde(skip)]
    pub detectors: Vec<Box<dyn ResourceDetector>>,
    /// Factory whose resource replaces colliding keys from earlier stages.
    #[serde(skip)]
    pub resource_override: Option<Box<dyn Fn() -> Resource + Send + Sync>>,
    /// Ordered resource transforms; `None` entries are skipped.
    #[serde(skip)]
    pub resource_customizers: Vec<Option<ResourceCustomizer>>,
}

impl std::fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("resource", &self.resource)
            .field("logs", &self.logs)
            .field("traces", &self.traces)
            .field("metrics", &self.metrics)
            .field("profiles", &self.profiles)
            .field("detectors", &self.detectors.len())
            .field("resource_override", &self.resource_override.is_some())
            .field("resource_customizers", &self.resource_customizers.len())
            .finish()
    }
}

impl TelemetryConfig {
    pub(crate) fn resource_settings(&mut self) -> ResourceSettings {
        let resource = std::mem::take(&mut self.resource);
        ResourceSettings {
            service_name: resource.service_name,
            service_version: resource.service_version,
            deployment_environment: resource.deployment_environment,
            service_namespace: resource.service_namespace,
            attributes: resource
                .attributes
                .into_iter()
                .map(|(key, value)| KeyValue::new(key, value))
                .collect(),
            detectors: std::mem::take(&mut self.detectors),
            override_resource: self.resource_override.take(),
            customizers: std::mem::take(&mut self.resource_customizers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_per_signal_spool_policy() {
        let config = TelemetryConfig::default();
        assert!(config.traces.use_spool_for(Signal::Traces));
        assert!(config.metrics.use_spool_for(Signal::Metrics));
        assert!(!config.logs.use_spool_for(Signal::Logs));
        assert!(config.logs.async_export);
    }

    #[test]
    fn explicit_use_spool_wins() {
        let config = SignalConfig {
            use_spool: Some(true),
            ..Default::default()
        };
        assert!(config.use_spool_for(Signal::Logs));
    }

    #[test]
    fn deserializes_from_json() {
        let config: TelemetryConfig = serde_json::from_str(
            r#"{
                "resource": {
                    "service_name": "checkout",
                    "service_version": "1.2.3",
                    "attributes": {"team": "payments"}
                },
                "traces": {
                    "enabled": true,
                    "endpoint": "otlp.example.com:4317",
                    "insecure": true,
                    "protocol": "grpc",
                    "use_global": true
                },
                "logs": {
                    "enabled": true,
                    "endpoint": "http://otlp.example.com:4318",
                    "protocol": "http",
                    "use_spool": true,
                    "async_export": false
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.resource.service_name, "checkout");
        assert!(config.traces.enabled);
        assert_eq!(config.traces.protocol, Protocol::Grpc);
        assert!(config.traces.use_global);
        assert_eq!(config.logs.protocol, Protocol::Http);
        assert_eq!(config.logs.use_spool, Some(true));
        assert!(!config.logs.async_export);
        assert!(!config.metrics.enabled);
    }
}
