//! Helpers shared by the per-signal pipeline builders.

use crate::config::SignalConfig;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::retry::{RetryDriver, RetryHandle, RetryOptions};
use crate::spool::Spool;
use crate::transport::{GrpcTransport, HttpTransport};
use crate::{Protocol, Signal};

pub(crate) fn parse_endpoint(signal: Signal, cfg: &SignalConfig) -> Result<Endpoint, Error> {
    let raw = cfg
        .endpoint
        .as_deref()
        .ok_or(Error::MissingEndpoint { signal })?;
    Endpoint::parse(raw, cfg.insecure)
}

pub(crate) fn open_spool(signal: Signal, cfg: &SignalConfig) -> Result<Spool, Error> {
    let dir = match &cfg.spool_dir {
        Some(dir) => dir.clone(),
        None => Spool::default_dir(signal).ok_or(Error::SpoolDir { signal })?,
    };
    Ok(Spool::open(dir, signal)?)
}

pub(crate) fn spawn_http_driver(
    signal: Signal,
    cfg: &SignalConfig,
    spool: Spool,
) -> Result<RetryHandle, Error> {
    RetryDriver::spawn(
        signal,
        Protocol::Http,
        spool,
        Box::new(HttpTransport::new(cfg.export_timeout())),
        RetryOptions::default(),
    )
}

pub(crate) fn spawn_grpc_driver(
    signal: Signal,
    cfg: &SignalConfig,
    endpoint: &Endpoint,
    spool: Spool,
) -> Result<RetryHandle, Error> {
    RetryDriver::spawn(
        signal,
        Protocol::Grpc,
        spool,
        Box::new(GrpcTransport::new(endpoint.origin(), cfg.export_timeout())),
        RetryOptions::default(),
    )
}
