//! Normalization of user-supplied collector endpoints.
//!
//! Users hand us endpoints in every shape the OTLP ecosystem has taught them:
//! `host:4317`, `http://host:4318`, `https://host/v1/traces`, with or without
//! trailing slashes. Both the HTTP and gRPC setup paths consume the same
//! normalized [`Endpoint`] record so the two transports cannot drift in how
//! they interpret the configuration.

use crate::error::Error;

/// A parsed collector endpoint: authority, optional path, and TLS mode.
///
/// Immutable once constructed; built exactly once per signal during setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    path: String,
    insecure: bool,
}

impl Endpoint {
    /// Parse a raw endpoint string.
    ///
    /// An explicit `http://` or `https://` scheme wins over `insecure_flag`;
    /// a bare authority falls back to it. A single trailing slash on the path
    /// is stripped, so `https://host/` and `https://host` are equivalent.
    pub fn parse(raw: &str, insecure_flag: bool) -> Result<Self, Error> {
        let trimmed = raw.trim();
        let (rest, insecure) = if let Some(rest) = trimmed.strip_prefix("http://") {
            (rest, true)
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            (rest, false)
        } else {
            (trimmed, insecure_flag)
        };

        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].trim_end_matches('/')),
            None => (rest, ""),
        };

        if host.is_empty() {
            return Err(Error::invalid_endpoint(raw, "endpoint host is empty"));
        }
        if path.contains('?') || path.contains('#') {
            return Err(Error::invalid_endpoint(
                raw,
                "endpoint path must not contain a query or fragment",
            ));
        }

        Ok(Endpoint {
            host: host.to_owned(),
            path: path.to_owned(),
            insecure,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    /// Authority plus path, without a scheme.
    pub fn host_with_path(&self) -> String {
        format!("{}{}", self.host, self.path)
    }

    /// The configured path, or `suffix` when no path was configured.
    ///
    /// HTTP exporters use this to honor an explicit per-signal path while
    /// falling back to the standard `/v1/<signal>` suffix.
    pub fn path_with_suffix(&self, suffix: &str) -> String {
        if self.path.is_empty() {
            suffix.to_owned()
        } else {
            self.path.clone()
        }
    }

    /// Full URL for the HTTP exporter of one signal.
    pub fn url_with_suffix(&self, suffix: &str) -> String {
        format!("{}{}{}", self.scheme_prefix(), self.host, self.path_with_suffix(suffix))
    }

    /// Scheme plus authority, as tonic channel endpoints expect.
    pub fn origin(&self) -> String {
        format!("{}{}", self.scheme_prefix(), self.host)
    }

    /// gRPC targets are bare authorities; refuse a configured path.
    pub fn require_bare(&self, raw: &str) -> Result<(), Error> {
        if self.path.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_endpoint(
                raw,
                "grpc endpoints must not contain a path",
            ))
        }
    }

    fn scheme_prefix(&self) -> &'static str {
        if self.insecure {
            "http://"
        } else {
            "https://"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_host_and_path() {
        let endpoint = Endpoint::parse("http://otlp.example.com/v1/traces", false).unwrap();
        assert_eq!(endpoint.host(), "otlp.example.com");
        assert_eq!(endpoint.path(), "/v1/traces");
        assert!(endpoint.is_insecure());
    }

    #[test]
    fn preserves_port_and_honors_caller_flag() {
        let endpoint = Endpoint::parse("otlp.example.com:4318", true).unwrap();
        assert_eq!(endpoint.host(), "otlp.example.com:4318");
        assert_eq!(endpoint.path(), "");
        assert!(endpoint.is_insecure());

        let endpoint = Endpoint::parse("otlp.example.com:4318", false).unwrap();
        assert!(!endpoint.is_insecure());
    }

    #[test]
    fn https_scheme_forces_secure_and_strips_trailing_slash() {
        let endpoint = Endpoint::parse("https://otlp.example.com/", true).unwrap();
        assert_eq!(endpoint.host(), "otlp.example.com");
        assert_eq!(endpoint.path(), "");
        assert!(!endpoint.is_insecure());
    }

    #[test]
    fn rejects_empty_host() {
        assert!(Endpoint::parse("", false).is_err());
        assert!(Endpoint::parse("http:///v1/traces", false).is_err());
        assert!(Endpoint::parse("https://", false).is_err());
    }

    #[test]
    fn rejects_query_and_fragment() {
        assert!(Endpoint::parse("http://host/v1?x=1", false).is_err());
        assert!(Endpoint::parse("host/v1#frag", false).is_err());
    }

    #[test]
    fn suffix_only_applies_without_path() {
        let bare = Endpoint::parse("otlp.example.com:4318", true).unwrap();
        assert_eq!(bare.path_with_suffix("/v1/logs"), "/v1/logs");
        assert_eq!(
            bare.url_with_suffix("/v1/logs"),
            "http://otlp.example.com:4318/v1/logs"
        );

        let pathed = Endpoint::parse("https://otlp.example.com/custom", false).unwrap();
        assert_eq!(pathed.path_with_suffix("/v1/logs"), "/custom");
        assert_eq!(
            pathed.url_with_suffix("/v1/logs"),
            "https://otlp.example.com/custom"
        );
    }

    #[test]
    fn grpc_requires_bare_authority() {
        let bare = Endpoint::parse("otlp.example.com:4317", true).unwrap();
        assert!(bare.require_bare("otlp.example.com:4317").is_ok());
        assert_eq!(bare.origin(), "http://otlp.example.com:4317");

        let pathed = Endpoint::parse("otlp.example.com:4317/v1/traces", true).unwrap();
        assert!(pathed.require_bare("otlp.example.com:4317/v1/traces").is_err());
    }
}
