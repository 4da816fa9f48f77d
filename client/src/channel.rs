//! Channel binding: which table's events this overlay renders.
//!
//! Resolved once per load, in priority order: the `channel` query parameter
//! of the page URL, the identity token, then the server's public config.

use crate::error::ChannelError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tableside_protocol::normalize_login;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// One table per channel.
    Table,
    /// Several tables multiplexed over one connection.
    Lobby,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingSource {
    Query,
    Token,
    ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    name: String,
    kind: ChannelKind,
    source: BindingSource,
}

impl ChannelBinding {
    pub fn new(name: &str, lobby_prefix: &str, source: BindingSource) -> Result<Self, ChannelError> {
        let normalized = normalize_login(name);
        if normalized.is_empty() {
            return Err(ChannelError::Empty(name.to_string()));
        }
        let kind = if is_lobby(&normalized, lobby_prefix) {
            ChannelKind::Lobby
        } else {
            ChannelKind::Table
        };
        Ok(Self {
            name: normalized,
            kind,
            source,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn source(&self) -> BindingSource {
        self.source
    }

    pub fn is_lobby(&self) -> bool {
        self.kind == ChannelKind::Lobby
    }

    /// Whether an event scoped to `channel` belongs to this binding. A missing
    /// channel never matches.
    pub fn matches(&self, channel: Option<&str>) -> bool {
        channel.is_some_and(|c| normalize_login(c) == self.name)
    }
}

/// `lobby`, `lobby-eu`, `lobby:2` are lobbies; `lobbyist` is not.
pub fn is_lobby(channel: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    match channel.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('-') || rest.starts_with(':'),
        None => false,
    }
}

/// Claims the overlay reads from an identity token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(default, alias = "channel_id")]
    pub channel: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl IdentityClaims {
    /// Channel derived from the identity: explicit channel, else the login,
    /// else the subject.
    pub fn channel(&self) -> Option<&str> {
        [&self.channel, &self.login, &self.sub]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.trim().is_empty())
    }

    pub fn viewer(&self) -> Option<&str> {
        self.login
            .as_deref()
            .or(self.sub.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Decode an identity token. With a secret the HS256 signature is verified;
/// without one the claims are read as-is.
pub fn identity_from_token(token: &str, secret: Option<&str>) -> Result<IdentityClaims, ChannelError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;

    let key = match secret {
        Some(secret) => DecodingKey::from_secret(secret.as_bytes()),
        None => {
            validation.insecure_disable_signature_validation();
            DecodingKey::from_secret(&[])
        }
    };

    decode::<IdentityClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| ChannelError::InvalidToken(e.to_string()))
}

/// `channel` query parameter of a page URL. Accepts absolute URLs and bare
/// query strings such as `?channel=foo`.
pub fn channel_from_query(page_url: &str) -> Option<String> {
    let url = Url::parse(page_url)
        .or_else(|_| Url::parse("http://overlay.invalid/").and_then(|base| base.join(page_url)))
        .ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "channel")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Inputs to channel resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindingSources<'a> {
    pub page_url: Option<&'a str>,
    pub token: Option<&'a str>,
    pub token_secret: Option<&'a str>,
    pub server_default: Option<&'a str>,
}

pub fn resolve(sources: BindingSources<'_>, lobby_prefix: &str) -> Result<ChannelBinding, ChannelError> {
    if let Some(channel) = sources.page_url.and_then(channel_from_query) {
        debug!(%channel, "channel bound from query parameter");
        return ChannelBinding::new(&channel, lobby_prefix, BindingSource::Query);
    }

    if let Some(token) = sources.token {
        match identity_from_token(token, sources.token_secret) {
            Ok(claims) => {
                if let Some(channel) = claims.channel() {
                    debug!(%channel, "channel bound from identity token");
                    return ChannelBinding::new(channel, lobby_prefix, BindingSource::Token);
                }
            }
            Err(e) => warn!(error = %e, "ignoring identity token"),
        }
    }

    if let Some(channel) = sources.server_default.filter(|c| !c.trim().is_empty()) {
        debug!(%channel, "channel bound from server config");
        return ChannelBinding::new(channel, lobby_prefix, BindingSource::ServerConfig);
    }

    Err(ChannelError::Unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(claims: &IdentityClaims, secret: &str) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn lobby_naming_convention() {
        assert!(is_lobby("lobby", "lobby"));
        assert!(is_lobby("lobby-eu", "lobby"));
        assert!(is_lobby("lobby:2", "lobby"));
        assert!(!is_lobby("lobbyist", "lobby"));
        assert!(!is_lobby("table-3", "lobby"));
        assert!(!is_lobby("lobby", ""));
    }

    #[test]
    fn query_parameter_wins() {
        let claims = IdentityClaims {
            channel: Some("from-token".into()),
            ..Default::default()
        };
        let tok = token(&claims, "s3cret");
        let binding = resolve(
            BindingSources {
                page_url: Some("https://ext.example/overlay.html?foo=1&channel=Table-3"),
                token: Some(&tok),
                token_secret: Some("s3cret"),
                server_default: Some("fallback"),
            },
            "lobby",
        )
        .unwrap();
        assert_eq!(binding.name(), "table-3");
        assert_eq!(binding.source(), BindingSource::Query);
        assert_eq!(binding.kind(), ChannelKind::Table);
    }

    #[test]
    fn token_then_server_fallback() {
        let claims = IdentityClaims {
            login: Some("Streamer".into()),
            ..Default::default()
        };
        let tok = token(&claims, "s3cret");
        let binding = resolve(
            BindingSources {
                page_url: Some("?other=1"),
                token: Some(&tok),
                token_secret: None,
                server_default: Some("fallback"),
            },
            "lobby",
        )
        .unwrap();
        assert_eq!(binding.name(), "streamer");
        assert_eq!(binding.source(), BindingSource::Token);

        let binding = resolve(
            BindingSources {
                token: Some("garbage"),
                server_default: Some("lobby-main"),
                ..Default::default()
            },
            "lobby",
        )
        .unwrap();
        assert_eq!(binding.source(), BindingSource::ServerConfig);
        assert!(binding.is_lobby());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let claims = IdentityClaims {
            channel: Some("x".into()),
            ..Default::default()
        };
        let tok = token(&claims, "right");
        assert!(identity_from_token(&tok, Some("wrong")).is_err());
        assert_eq!(identity_from_token(&tok, None).unwrap().channel(), Some("x"));
    }

    #[test]
    fn nothing_to_bind() {
        assert_eq!(resolve(BindingSources::default(), "lobby"), Err(ChannelError::Unresolved));
    }

    #[test]
    fn matching_is_case_insensitive_and_requires_channel() {
        let binding = ChannelBinding::new("Table-3", "lobby", BindingSource::Query).unwrap();
        assert!(binding.matches(Some("TABLE-3")));
        assert!(!binding.matches(Some("table-9")));
        assert!(!binding.matches(None));
    }
}
