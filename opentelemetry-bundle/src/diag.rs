//! Out-of-band diagnostics for delivery failures.
//!
//! The bundle must never report its own failures through the pipelines it is
//! diagnosing: a broken logs exporter that logs through the logs exporter
//! feeds itself forever. Diagnostics therefore go straight to the process
//! standard error stream as single structured lines, e.g.
//!
//! ```text
//! opentelemetry-bundle: signal=traces protocol=http kind=retry error="remote status 503"
//! ```
//!
//! Every line carries the signal and protocol tags plus a short machine-
//! greppable kind, so operators can assert error visibility from log capture.
//! Tests (or hosts that want the stream elsewhere) may install a replacement
//! writer with [`set_writer`].

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

use crate::Protocol;
use crate::Signal;

static WRITER: Mutex<Option<Box<dyn Write + Send>>> = Mutex::new(None);

/// Replace the diagnostic writer. `None` restores the default (stderr).
pub fn set_writer(writer: Option<Box<dyn Write + Send>>) {
    let mut guard = WRITER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = writer;
}

/// Emit one structured diagnostic line.
pub(crate) fn error(
    signal: Signal,
    protocol: Option<Protocol>,
    kind: &str,
    cause: &dyn fmt::Display,
) {
    let mut guard = WRITER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    match guard.as_mut() {
        Some(writer) => {
            let _ = write_line(writer.as_mut(), signal, protocol, kind, cause);
        }
        None => {
            let stderr = io::stderr();
            let mut lock = stderr.lock();
            let _ = write_line(&mut lock, signal, protocol, kind, cause);
        }
    }
}

fn write_line(
    writer: &mut dyn Write,
    signal: Signal,
    protocol: Option<Protocol>,
    kind: &str,
    cause: &dyn fmt::Display,
) -> io::Result<()> {
    match protocol {
        Some(protocol) => writeln!(
            writer,
            "opentelemetry-bundle: signal={signal} protocol={protocol} kind={kind} error=\"{cause}\""
        ),
        None => writeln!(
            writer,
            "opentelemetry-bundle: signal={signal} kind={kind} error=\"{cause}\""
        ),
    }
}
