//! Logs pipeline assembly.
//!
//! Logs carry one knob the other signals do not: `async_export` picks the
//! processor (batching thread vs synchronous emit), while `use_spool`
//! independently decides whether the durable queue sits underneath. The four
//! combinations are all legal.

use opentelemetry_otlp::{WithExportConfig as _, WithHttpConfig as _, WithTonicConfig as _};
use opentelemetry_sdk::logs::{LogExporter, LoggerProviderBuilder, SdkLoggerProvider};
use opentelemetry_sdk::Resource;

use crate::client::{SpoolHttpClient, SpoolLogExporter};
use crate::config::SignalConfig;
use crate::error::Error;
use crate::export::InstrumentedLogExporter;
use crate::pipeline;
use crate::retry::RetryHandle;
use crate::transport::setup_metadata;
use crate::{Protocol, Signal};

const LOGS_PATH_SUFFIX: &str = "/v1/logs";

pub(crate) struct LogsPipeline {
    pub(crate) provider: SdkLoggerProvider,
    pub(crate) retry: Option<RetryHandle>,
}

fn attach<E: LogExporter + 'static>(
    builder: LoggerProviderBuilder,
    exporter: E,
    async_export: bool,
) -> LoggerProviderBuilder {
    if async_export {
        builder.with_batch_exporter(exporter)
    } else {
        builder.with_simple_exporter(exporter)
    }
}

pub(crate) fn build(cfg: &SignalConfig, resource: &Resource) -> Result<LogsPipeline, Error> {
    let endpoint = pipeline::parse_endpoint(Signal::Logs, cfg)?;
    let headers = cfg.credentials.header_map();
    let timeout = cfg.export_timeout();
    let mut retry = None;

    let mut builder = SdkLoggerProvider::builder().with_resource(resource.clone());
    match (cfg.protocol, cfg.use_spool_for(Signal::Logs)) {
        (Protocol::Http, spooled) => {
            let mut exporter_builder = opentelemetry_otlp::LogExporter::builder()
                .with_http()
                .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                .with_endpoint(endpoint.url_with_suffix(LOGS_PATH_SUFFIX))
                .with_timeout(timeout)
                .with_headers(headers);
            if spooled {
                let spool = pipeline::open_spool(Signal::Logs, cfg)?;
                retry = Some(pipeline::spawn_http_driver(Signal::Logs, cfg, spool.clone())?);
                exporter_builder =
                    exporter_builder.with_http_client(SpoolHttpClient::spooled(spool, Signal::Logs));
            } else {
                exporter_builder =
                    exporter_builder.with_http_client(SpoolHttpClient::direct(Signal::Logs, timeout));
            }
            let exporter = exporter_builder.build()?;
            builder = attach(
                builder,
                InstrumentedLogExporter::new(exporter, Protocol::Http),
                cfg.async_export,
            );
        }
        (Protocol::Grpc, true) => {
            endpoint.require_bare(cfg.endpoint.as_deref().unwrap_or_default())?;
            let spool = pipeline::open_spool(Signal::Logs, cfg)?;
            retry = Some(pipeline::spawn_grpc_driver(
                Signal::Logs,
                cfg,
                &endpoint,
                spool.clone(),
            )?);
            let exporter = SpoolLogExporter::new(spool, headers);
            builder = attach(
                builder,
                InstrumentedLogExporter::new(exporter, Protocol::Grpc),
                cfg.async_export,
            );
        }
        (Protocol::Grpc, false) => {
            endpoint.require_bare(cfg.endpoint.as_deref().unwrap_or_default())?;
            let exporter = opentelemetry_otlp::LogExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.origin())
                .with_timeout(timeout)
                .with_metadata(setup_metadata(&headers)?)
                .build()?;
            builder = attach(
                builder,
                InstrumentedLogExporter::new(exporter, Protocol::Grpc),
                cfg.async_export,
            );
        }
    }

    Ok(LogsPipeline {
        provider: builder.build(),
        retry,
    })
}
