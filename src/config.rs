//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::oauth::{ClientRegistration, issuer_base};
use crate::{Error, Result};

/// Placeholder for the BFF's own public URL in the redirect-URI template
const BASE_URL_PLACEHOLDER: &str = "{baseUrl}";
/// Placeholder for the client id in the scope template
const CLIENT_ID_PLACEHOLDER: &str = "{clientId}";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// BFF listener
    pub server: ServerConfig,
    /// Identity provider registration
    pub identity: IdentityConfig,
    /// Client application
    pub app: AppConfig,
    /// Upstream resource server the proxy forwards to
    pub upstream: UpstreamConfig,
    /// Session cookie and expiry
    pub session: SessionConfig,
    /// Downstream resource server (`resource` subcommand)
    pub resource: ResourceConfig,
}

/// BFF server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible URL of the BFF (defaults to `http://{host}:{port}`)
    pub public_url: Option<String>,
    /// Whole-request timeout; must exceed `identity.timeout` and `upstream.timeout`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            public_url: None,
            request_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity provider registration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret.
    /// Supports: literal value, `env:VAR_NAME`, or `${VAR}` expansion
    pub client_secret: String,
    /// Issuer URL, with or without a trailing `/v2.0`
    pub issuer_uri: String,
    /// Redirect URI template; `{baseUrl}` is replaced by the BFF's public URL
    pub redirect_uri: String,
    /// Scope template; `{clientId}` is replaced by the client id
    pub scope: String,
    /// Timeout on token endpoint calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            issuer_uri: String::new(),
            redirect_uri: "{baseUrl}/v1/auth/session/accessToken".to_string(),
            scope: "openid profile email offline_access api://{clientId}/Data.Read".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("issuer_uri", &self.issuer_uri)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl IdentityConfig {
    /// Resolve the client secret (`env:VAR_NAME` reads the variable)
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        if let Some(var_name) = self.client_secret.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.client_secret.clone())
        } else {
            self.client_secret.clone()
        }
    }

    /// Requested scopes with the client id substituted
    #[must_use]
    pub fn resolve_scope(&self) -> String {
        self.scope.replace(CLIENT_ID_PLACEHOLDER, &self.client_id)
    }
}

/// Client application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Client origin: post-login and post-logout target, the only CORS origin
    pub client_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Upstream resource server the proxy forwards to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL (scheme, host, port)
    pub base_url: String,
    /// API version prefix every upstream path carries
    pub api_prefix: String,
    /// Timeout on proxied calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3002".to_string(),
            api_prefix: "/v1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Session cookie and expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie carrying the session id
    pub cookie_name: String,
    /// Set the `Secure` attribute
    pub secure_cookie: bool,
    /// Sessions unused for this long are dropped
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// How often idle sessions are reaped
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "BFFSESSION".to_string(),
            secure_cookie: false,
            idle_timeout: Duration::from_secs(30 * 60),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Downstream resource server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Expected token issuer (defaults to `identity.issuer_uri`)
    pub issuer: Option<String>,
    /// Accepted audiences (empty = audience not checked)
    pub audiences: Vec<String>,
    /// JWKS endpoint (defaults to `{issuer base}/discovery/v2.0/keys`)
    pub jwks_uri: Option<String>,
    /// Verify bearer tokens; when off every request runs as a mock principal
    pub security_enabled: bool,
    /// How long fetched signing keys are cached
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3002,
            issuer: None,
            audiences: Vec::new(),
            jwks_uri: None,
            security_enabled: true,
            jwks_cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (BFF_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("BFF_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in secrets and URLs
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Check the settings the BFF cannot start without
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first missing or malformed setting.
    pub fn validate_bff(&self) -> Result<()> {
        if self.identity.client_id.trim().is_empty() {
            return Err(Error::Config("identity.client_id is required".to_string()));
        }
        for (key, value) in [
            ("identity.issuer_uri", &self.identity.issuer_uri),
            ("upstream.base_url", &self.upstream.base_url),
            ("app.client_url", &self.app.client_url),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{key} is required")));
            }
            url::Url::parse(value).map_err(|e| Error::Config(format!("Invalid {key}: {e}")))?;
        }
        // Outbound failures must surface as errors, not as an outer 504
        for (key, outbound) in [
            ("identity.timeout", self.identity.timeout),
            ("upstream.timeout", self.upstream.timeout),
        ] {
            if self.server.request_timeout <= outbound {
                return Err(Error::Config(format!(
                    "server.request_timeout ({:?}) must be greater than {key} ({outbound:?})",
                    self.server.request_timeout
                )));
            }
        }
        if self.identity.resolve_client_secret().is_empty() {
            tracing::warn!("identity.client_secret is empty; token requests will likely be rejected");
        }
        Ok(())
    }

    /// Externally visible BFF URL
    #[must_use]
    pub fn public_url(&self) -> String {
        self.server.public_url.as_ref().map_or_else(
            || format!("http://{}:{}", self.server.host, self.server.port),
            |url| url.trim_end_matches('/').to_string(),
        )
    }

    /// Redirect URI with `{baseUrl}` substituted
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        self.identity
            .redirect_uri
            .replace(BASE_URL_PLACEHOLDER, &self.public_url())
    }

    /// Client registration used on every token request
    #[must_use]
    pub fn client_registration(&self) -> ClientRegistration {
        ClientRegistration {
            client_id: self.identity.client_id.clone(),
            client_secret: self.identity.resolve_client_secret(),
            redirect_uri: self.redirect_uri(),
            scopes: self.identity.resolve_scope(),
        }
    }

    /// Issuer the resource server expects on bearer tokens
    #[must_use]
    pub fn resource_issuer(&self) -> String {
        self.resource
            .issuer
            .clone()
            .unwrap_or_else(|| self.identity.issuer_uri.clone())
    }

    /// JWKS endpoint the resource server fetches signing keys from
    #[must_use]
    pub fn resource_jwks_uri(&self) -> String {
        self.resource.jwks_uri.clone().unwrap_or_else(|| {
            format!("{}/discovery/v2.0/keys", issuer_base(&self.resource_issuer()))
        })
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) -> Result<()> {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        for value in [
            &mut self.identity.client_id,
            &mut self.identity.client_secret,
            &mut self.identity.issuer_uri,
            &mut self.app.client_url,
            &mut self.upstream.base_url,
        ] {
            *value = Self::expand_string(&re, value);
        }

        for value in [
            &mut self.server.public_url,
            &mut self.resource.issuer,
            &mut self.resource.jwks_uri,
        ]
        .into_iter()
        .flatten()
        {
            *value = Self::expand_string(&re, value);
        }

        for audience in &mut self.resource.audiences {
            *audience = Self::expand_string(&re, audience);
        }

        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "1h", "100ms" or bare seconds
    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            // Assume seconds
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
