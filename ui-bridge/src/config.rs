use std::{env, time::Duration};

use url::Url;

pub const DEFAULT_LOCAL_PORT: u16 = 4213;
pub const DEFAULT_REMOTE_URL: &str = "https://ui.duckdb.org";
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 284;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

pub const ENV_LOCAL_PORT: &str = "ui_local_port";
pub const ENV_REMOTE_URL: &str = "ui_remote_url";
pub const ENV_POLLING_INTERVAL: &str = "ui_polling_interval";
pub const ENV_ALLOW_UNSIGNED_EXTENSIONS: &str = "allow_unsigned_extensions";
pub const ENV_DISABLE_CERTIFICATE_VERIFICATION: &str =
    "ui_disable_server_certificate_verification";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UiSettings {
    pub local_port: u16,
    pub remote_url: String,
    pub polling_interval: Duration,
    /// Gates `remote_url`: without it the default remote URL is always used.
    pub allow_unsigned_extensions: bool,
    pub http: HttpClientParams,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpClientParams {
    pub timeout: Duration,
    pub http_proxy: Option<String>,
    pub http_proxy_port: Option<u16>,
    pub http_proxy_username: Option<String>,
    pub http_proxy_password: Option<String>,
}

impl Default for HttpClientParams {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            http_proxy: None,
            http_proxy_port: None,
            http_proxy_username: None,
            http_proxy_password: None,
        }
    }
}

impl HttpClientParams {
    /// Proxy URL with the port applied, if a proxy host is configured.
    pub fn proxy_url(&self) -> Option<String> {
        let host = self.http_proxy.as_deref()?.trim();
        if host.is_empty() {
            return None;
        }
        let with_scheme = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        match self.http_proxy_port {
            Some(port) => match Url::parse(&with_scheme) {
                Ok(mut url) if url.port().is_none() => {
                    let _ = url.set_port(Some(port));
                    Some(url.to_string())
                }
                _ => Some(with_scheme),
            },
            None => Some(with_scheme),
        }
    }
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            local_port: DEFAULT_LOCAL_PORT,
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            allow_unsigned_extensions: false,
            http: HttpClientParams::default(),
        }
    }
}

impl UiSettings {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| {
            env::var(name)
                .ok()
                .or_else(|| env::var(name.to_ascii_uppercase()).ok())
        })
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        if let Some(value) = lookup(ENV_LOCAL_PORT) {
            settings.local_port = value
                .trim()
                .parse()
                .map_err(|_| SettingsError::invalid(ENV_LOCAL_PORT, &value))?;
        }
        if let Some(value) = lookup(ENV_POLLING_INTERVAL) {
            let millis: u64 = value
                .trim()
                .parse()
                .map_err(|_| SettingsError::invalid(ENV_POLLING_INTERVAL, &value))?;
            settings.polling_interval = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(ENV_ALLOW_UNSIGNED_EXTENSIONS) {
            settings.allow_unsigned_extensions = parse_flag(&value)
                .ok_or_else(|| SettingsError::invalid(ENV_ALLOW_UNSIGNED_EXTENSIONS, &value))?;
        }
        if let Some(value) = lookup(ENV_REMOTE_URL) {
            validate_remote_url(&value)?;
            settings.remote_url = value.trim().to_string();
        }

        Ok(settings)
    }

    /// The remote URL actually proxied to.
    pub fn resolved_remote_url(&self) -> &str {
        if self.allow_unsigned_extensions {
            &self.remote_url
        } else {
            DEFAULT_REMOTE_URL
        }
    }
}

pub fn validate_remote_url(value: &str) -> Result<(), SettingsError> {
    let url = Url::parse(value.trim())
        .map_err(|err| SettingsError::InvalidRemoteUrl(format!("{value}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SettingsError::InvalidRemoteUrl(format!(
            "{value}: expected an http(s) origin"
        )));
    }
    Ok(())
}

pub fn certificate_verification_disabled() -> bool {
    env::var(ENV_DISABLE_CERTIFICATE_VERIFICATION)
        .ok()
        .and_then(|value| parse_flag(&value))
        .unwrap_or(false)
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    InvalidValue { name: &'static str, value: String },
    InvalidRemoteUrl(String),
}

impl SettingsError {
    fn invalid(name: &'static str, value: &str) -> Self {
        SettingsError::InvalidValue {
            name,
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::InvalidValue { name, value } => {
                write!(f, "invalid value for {name}: '{value}'")
            }
            SettingsError::InvalidRemoteUrl(reason) => write!(f, "invalid remote url {reason}"),
        }
    }
}

impl std::error::Error for SettingsError {}
