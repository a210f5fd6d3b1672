//! Metrics pipeline assembly.

use opentelemetry::global;
use opentelemetry_otlp::{WithExportConfig as _, WithHttpConfig as _, WithTonicConfig as _};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider, Temporality};
use opentelemetry_sdk::Resource;

use crate::client::{SpoolHttpClient, SpoolMetricExporter};
use crate::config::{SignalConfig, DEFAULT_METRIC_EXPORT_INTERVAL};
use crate::error::Error;
use crate::export::InstrumentedMetricExporter;
use crate::pipeline;
use crate::retry::RetryHandle;
use crate::transport::setup_metadata;
use crate::{Protocol, Signal};

const METRICS_PATH_SUFFIX: &str = "/v1/metrics";

pub(crate) struct MetricsPipeline {
    pub(crate) provider: SdkMeterProvider,
    pub(crate) retry: Option<RetryHandle>,
}

pub(crate) fn build(cfg: &SignalConfig, resource: &Resource) -> Result<MetricsPipeline, Error> {
    let endpoint = pipeline::parse_endpoint(Signal::Metrics, cfg)?;
    let headers = cfg.credentials.header_map();
    let timeout = cfg.export_timeout();
    let interval = cfg
        .export_interval
        .unwrap_or(DEFAULT_METRIC_EXPORT_INTERVAL);
    let mut retry = None;

    let mut builder = SdkMeterProvider::builder().with_resource(resource.clone());
    match (cfg.protocol, cfg.use_spool_for(Signal::Metrics)) {
        (Protocol::Http, spooled) => {
            let mut exporter_builder = opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                .with_endpoint(endpoint.url_with_suffix(METRICS_PATH_SUFFIX))
                .with_timeout(timeout)
                .with_headers(headers)
                .with_temporality(Temporality::default());
            if spooled {
                let spool = pipeline::open_spool(Signal::Metrics, cfg)?;
                retry = Some(pipeline::spawn_http_driver(
                    Signal::Metrics,
                    cfg,
                    spool.clone(),
                )?);
                exporter_builder = exporter_builder
                    .with_http_client(SpoolHttpClient::spooled(spool, Signal::Metrics));
            } else {
                exporter_builder = exporter_builder
                    .with_http_client(SpoolHttpClient::direct(Signal::Metrics, timeout));
            }
            let exporter = exporter_builder.build()?;
            let reader = PeriodicReader::builder(InstrumentedMetricExporter::new(
                exporter,
                Protocol::Http,
            ))
            .with_interval(interval)
            .build();
            builder = builder.with_reader(reader);
        }
        (Protocol::Grpc, true) => {
            endpoint.require_bare(cfg.endpoint.as_deref().unwrap_or_default())?;
            let spool = pipeline::open_spool(Signal::Metrics, cfg)?;
            retry = Some(pipeline::spawn_grpc_driver(
                Signal::Metrics,
                cfg,
                &endpoint,
                spool.clone(),
            )?);
            let exporter = SpoolMetricExporter::new(spool, headers, Temporality::default());
            let reader = PeriodicReader::builder(InstrumentedMetricExporter::new(
                exporter,
                Protocol::Grpc,
            ))
            .with_interval(interval)
            .build();
            builder = builder.with_reader(reader);
        }
        (Protocol::Grpc, false) => {
            endpoint.require_bare(cfg.endpoint.as_deref().unwrap_or_default())?;
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.origin())
                .with_timeout(timeout)
                .with_metadata(setup_metadata(&headers)?)
                .with_temporality(Temporality::default())
                .build()?;
            let reader = PeriodicReader::builder(InstrumentedMetricExporter::new(
                exporter,
                Protocol::Grpc,
            ))
            .with_interval(interval)
            .build();
            builder = builder.with_reader(reader);
        }
    }

    let provider = builder.build();
    if cfg.use_global {
        global::set_meter_provider(provider.clone());
    }

    Ok(MetricsPipeline { provider, retry })
}
