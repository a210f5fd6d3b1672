//! Adapters that intercept OTLP client sends and divert them into the spool.

mod grpc;
mod http;

pub use grpc::{SpoolLogExporter, SpoolMetricExporter, SpoolSpanExporter};
pub use http::SpoolHttpClient;
