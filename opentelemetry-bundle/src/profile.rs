//! Trace ↔ continuous-profile correlation.
//!
//! The continuous profiler stamps its samples with a profile identifier; the
//! backend can stitch profiles to traces when spans carry the same identifier
//! as an attribute. The ambient label set here is the task-local
//! [`Context`]: a scope installs its [`ProfileId`], and the span-start hook
//! copies it onto every span started underneath.
//!
//! ```
//! use opentelemetry_bundle::profile;
//!
//! let _guard = profile::attach_profile_id("p-42");
//! // Spans started on this task now carry pyroscope.profile.id = "p-42".
//! ```

use std::time::Duration;

use opentelemetry::trace::Span as _;
use opentelemetry::{Context, ContextGuard, KeyValue};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{Span, SpanData, SpanProcessor};

/// Label key linking spans to continuous-profile samples.
pub const PROFILE_ID_LABEL: &str = "pyroscope.profile.id";

/// The active profile identifier, carried as a context value.
#[derive(Debug, Clone)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        ProfileId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Return `cx` extended with the given profile identifier.
pub fn with_profile_id(cx: &Context, id: impl Into<String>) -> Context {
    cx.with_value(ProfileId::new(id))
}

/// Install a profile identifier on the current task until the guard drops.
pub fn attach_profile_id(id: impl Into<String>) -> ContextGuard {
    Context::current_with_value(ProfileId::new(id)).attach()
}

/// The profile identifier visible to the current task, if any.
pub fn current_profile_id() -> Option<String> {
    Context::map_current(|cx| cx.get::<ProfileId>().map(|id| id.0.clone()))
}

/// Span-start hook copying the ambient [`ProfileId`] onto each span.
///
/// No-op on span end, flush, and shutdown; does not allocate when no profile
/// identifier is installed.
#[derive(Debug, Default)]
pub struct ProfileLinkProcessor;

impl ProfileLinkProcessor {
    pub fn new() -> Self {
        ProfileLinkProcessor
    }
}

impl SpanProcessor for ProfileLinkProcessor {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        if let Some(profile) = cx.get::<ProfileId>() {
            span.set_attribute(KeyValue::new(PROFILE_ID_LABEL, profile.0.clone()));
        }
    }

    fn on_end(&self, _span: SpanData) {}

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{TraceContextExt as _, Tracer as _, TracerProvider as _};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};

    fn test_provider() -> (SdkTracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_span_processor(ProfileLinkProcessor::new())
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    #[test]
    fn span_under_profile_scope_carries_the_label() {
        let (provider, exporter) = test_provider();
        let tracer = provider.tracer("profile-link");

        {
            let _guard = attach_profile_id("p-42");
            tracer.in_span("linked", |_cx| {});
        }

        let spans = exporter.get_finished_spans().unwrap();
        provider.shutdown().unwrap();
        assert_eq!(spans.len(), 1);
        let attr = spans[0]
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == PROFILE_ID_LABEL)
            .expect("profile link attribute missing");
        assert_eq!(attr.value.as_str(), "p-42");
    }

    #[test]
    fn span_without_profile_scope_has_no_label() {
        let (provider, exporter) = test_provider();
        let tracer = provider.tracer("profile-link");

        tracer.in_span("unlinked", |_cx| {});

        let spans = exporter.get_finished_spans().unwrap();
        provider.shutdown().unwrap();
        assert_eq!(spans.len(), 1);
        assert!(spans[0]
            .attributes
            .iter()
            .all(|kv| kv.key.as_str() != PROFILE_ID_LABEL));
    }

    #[test]
    fn explicit_context_propagation_works_without_attach() {
        let (provider, exporter) = test_provider();
        let tracer = provider.tracer("profile-link");

        let cx = with_profile_id(&Context::current(), "p-7");
        let span = tracer.start_with_context("explicit", &cx);
        drop(cx.with_span(span));

        let spans = exporter.get_finished_spans().unwrap();
        provider.shutdown().unwrap();
        let attr = spans[0]
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == PROFILE_ID_LABEL)
            .expect("profile link attribute missing");
        assert_eq!(attr.value.as_str(), "p-7");
    }

    #[test]
    fn current_profile_id_reflects_scope() {
        assert_eq!(current_profile_id(), None);
        {
            let _guard = attach_profile_id("p-9");
            assert_eq!(current_profile_id().as_deref(), Some("p-9"));
        }
        assert_eq!(current_profile_id(), None);
    }
}
