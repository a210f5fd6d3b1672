//! Setup-phase errors surfaced from [`Telemetry::new`](crate::Telemetry::new).
//!
//! Runtime delivery failures never reach the host application; they travel
//! through the diagnostic sink or stay inside the retry loop. Everything in
//! this module is a configuration problem and therefore fatal.

use thiserror::Error;

use crate::spool::SpoolError;
use crate::Signal;

/// Errors raised while building a [`Telemetry`](crate::Telemetry) instance.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// `resource.service_name` is required and must be non-empty.
    #[error("resource service name is required")]
    MissingServiceName,

    /// A signal is enabled but has no endpoint configured.
    #[error("{signal} endpoint is required when the signal is enabled")]
    MissingEndpoint {
        /// The signal whose configuration is incomplete.
        signal: Signal,
    },

    /// The endpoint string could not be normalized.
    #[error("invalid endpoint {raw:?}: {reason}")]
    InvalidEndpoint {
        /// The raw string as configured.
        raw: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configured header name or value is not valid for the wire.
    #[error("invalid header {name:?}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// No spool directory was configured and the user cache directory could
    /// not be resolved.
    #[error("could not resolve a spool directory for {signal}")]
    SpoolDir {
        /// The signal whose spool could not be placed.
        signal: Signal,
    },

    /// Creating or locking the spool failed.
    #[error(transparent)]
    Spool(#[from] SpoolError),

    /// The underlying OTLP exporter builder rejected the configuration.
    #[error(transparent)]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A resource customizer returned an error, aborting construction.
    #[error("resource customizer failed: {0}")]
    ResourceCustomizer(String),

    /// The retry driver thread could not be spawned.
    #[error("failed to spawn retry driver: {0}")]
    Spawn(#[source] std::io::Error),

    /// One or more providers reported an error during shutdown.
    #[error("telemetry shutdown failed: {0}")]
    Shutdown(String),
}

impl Error {
    pub(crate) fn invalid_endpoint(raw: &str, reason: impl Into<String>) -> Self {
        Error::InvalidEndpoint {
            raw: raw.to_owned(),
            reason: reason.into(),
        }
    }
}
