//! Backend credentials and the header map they produce.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

/// Default header name used for API-key authentication.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Authentication material for one signal's backend.
///
/// Headers are materialized once per setup via [`Credentials::header_map`];
/// the returned map is an owned value, safe to mutate without affecting the
/// configuration it came from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Basic-auth user. Takes effect together with `password`.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Bearer token. Ignored when basic auth is also configured.
    pub bearer_token: Option<String>,
    /// API key, sent under [`api_key_header`](Self::api_key_header).
    pub api_key: Option<String>,
    /// Header name for the API key; defaults to `X-API-Key`.
    pub api_key_header: Option<String>,
    /// Arbitrary additional headers. A caller-provided `Authorization` entry
    /// is dropped; the authorization header is owned by the fields above.
    pub headers: HashMap<String, String>,
}

impl Credentials {
    /// Build the outbound header map.
    ///
    /// Precedence: basic auth over bearer token; the configured API-key
    /// header is independent of both.
    pub fn header_map(&self) -> HashMap<String, String> {
        let mut headers: HashMap<String, String> = self
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("authorization"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        if let Some(api_key) = &self.api_key {
            let name = self
                .api_key_header
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_owned());
            headers.insert(name, api_key.clone());
        }

        if let Some(token) = &self.bearer_token {
            headers.insert("Authorization".to_owned(), format!("Bearer {token}"));
        }

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            headers.insert("Authorization".to_owned(), format!("Basic {encoded}"));
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_wins_over_bearer() {
        let creds = Credentials {
            username: Some("user".into()),
            password: Some("pass".into()),
            bearer_token: Some("tok".into()),
            ..Default::default()
        };
        let headers = creds.header_map();
        let auth = headers.get("Authorization").unwrap();
        assert!(auth.starts_with("Basic "), "got {auth}");
        assert_eq!(auth, &format!("Basic {}", STANDARD.encode("user:pass")));
    }

    #[test]
    fn bearer_applies_without_basic() {
        let creds = Credentials {
            bearer_token: Some("tok".into()),
            ..Default::default()
        };
        assert_eq!(
            creds.header_map().get("Authorization").map(String::as_str),
            Some("Bearer tok")
        );
    }

    #[test]
    fn api_key_uses_configured_header() {
        let creds = Credentials {
            api_key: Some("secret".into()),
            ..Default::default()
        };
        assert_eq!(
            creds.header_map().get(DEFAULT_API_KEY_HEADER).map(String::as_str),
            Some("secret")
        );

        let creds = Credentials {
            api_key: Some("secret".into()),
            api_key_header: Some("X-Scope-OrgID".into()),
            ..Default::default()
        };
        let headers = creds.header_map();
        assert_eq!(headers.get("X-Scope-OrgID").map(String::as_str), Some("secret"));
        assert!(!headers.contains_key(DEFAULT_API_KEY_HEADER));
    }

    #[test]
    fn caller_authorization_is_dropped() {
        let mut extra = HashMap::new();
        extra.insert("authorization".to_owned(), "spoofed".to_owned());
        extra.insert("X-Custom".to_owned(), "kept".to_owned());
        let creds = Credentials {
            bearer_token: Some("tok".into()),
            headers: extra,
            ..Default::default()
        };
        let headers = creds.header_map();
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer tok"));
        assert!(!headers.contains_key("authorization"));
        assert_eq!(headers.get("X-Custom").map(String::as_str), Some("kept"));
    }
}
