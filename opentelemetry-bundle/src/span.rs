//! Traces pipeline assembly.

use opentelemetry::global;
use opentelemetry_otlp::{WithExportConfig as _, WithHttpConfig as _, WithTonicConfig as _};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;

use crate::client::{SpoolHttpClient, SpoolSpanExporter};
use crate::config::SignalConfig;
use crate::error::Error;
use crate::export::InstrumentedSpanExporter;
use crate::pipeline;
use crate::profile::ProfileLinkProcessor;
use crate::retry::RetryHandle;
use crate::transport::setup_metadata;
use crate::{Protocol, Signal};

const TRACES_PATH_SUFFIX: &str = "/v1/traces";

pub(crate) struct TracesPipeline {
    pub(crate) provider: SdkTracerProvider,
    pub(crate) retry: Option<RetryHandle>,
}

pub(crate) fn build(
    cfg: &SignalConfig,
    resource: &Resource,
    link_profiles: bool,
) -> Result<TracesPipeline, Error> {
    let endpoint = pipeline::parse_endpoint(Signal::Traces, cfg)?;
    let headers = cfg.credentials.header_map();
    let timeout = cfg.export_timeout();
    let mut retry = None;

    let mut builder = SdkTracerProvider::builder().with_resource(resource.clone());
    match (cfg.protocol, cfg.use_spool_for(Signal::Traces)) {
        (Protocol::Http, spooled) => {
            let mut exporter_builder = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                .with_endpoint(endpoint.url_with_suffix(TRACES_PATH_SUFFIX))
                .with_timeout(timeout)
                .with_headers(headers);
            if spooled {
                let spool = pipeline::open_spool(Signal::Traces, cfg)?;
                retry = Some(pipeline::spawn_http_driver(Signal::Traces, cfg, spool.clone())?);
                exporter_builder = exporter_builder
                    .with_http_client(SpoolHttpClient::spooled(spool, Signal::Traces));
            } else {
                exporter_builder =
                    exporter_builder.with_http_client(SpoolHttpClient::direct(Signal::Traces, timeout));
            }
            let exporter = exporter_builder.build()?;
            builder = builder
                .with_batch_exporter(InstrumentedSpanExporter::new(exporter, Protocol::Http));
        }
        (Protocol::Grpc, true) => {
            endpoint.require_bare(cfg.endpoint.as_deref().unwrap_or_default())?;
            let spool = pipeline::open_spool(Signal::Traces, cfg)?;
            retry = Some(pipeline::spawn_grpc_driver(
                Signal::Traces,
                cfg,
                &endpoint,
                spool.clone(),
            )?);
            let exporter = SpoolSpanExporter::new(spool, headers);
            builder = builder
                .with_batch_exporter(InstrumentedSpanExporter::new(exporter, Protocol::Grpc));
        }
        (Protocol::Grpc, false) => {
            endpoint.require_bare(cfg.endpoint.as_deref().unwrap_or_default())?;
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.origin())
                .with_timeout(timeout)
                .with_metadata(setup_metadata(&headers)?)
                .build()?;
            builder = builder
                .with_batch_exporter(InstrumentedSpanExporter::new(exporter, Protocol::Grpc));
        }
    }

    if link_profiles {
        builder = builder.with_span_processor(ProfileLinkProcessor::new());
    }

    let provider = builder.build();
    if cfg.use_global {
        global::set_tracer_provider(provider.clone());
    }

    Ok(TracesPipeline { provider, retry })
}
