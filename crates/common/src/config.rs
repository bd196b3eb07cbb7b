//! Runtime configuration: limits, listener addresses, adapter defaults.
//!
//! Loaded the way the teacher's `SystemConfig` is (`toml::from_str` over a
//! `#[serde(default = "...")]`-annotated struct), then overridden from the
//! environment variables `spec.md` §6 names.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushiConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub ssl_key: Option<String>,
    #[serde(default)]
    pub ssl_cer: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            app_port: default_app_port(),
            control_port: default_control_port(),
            ssl: false,
            ssl_key: None,
            ssl_cer: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_app_port() -> u16 {
    9090
}
fn default_control_port() -> u16 {
    8080
}

/// Enforcement limits (`spec.md` §4.1, §6). All configurable, none
/// hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    #[serde(default = "default_max_connections_per_app")]
    pub max_connections_per_app: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_channels_per_socket")]
    pub max_channels_per_socket: usize,
    #[serde(default = "default_max_sockets_per_channel")]
    pub max_sockets_per_channel: usize,
    #[serde(default = "default_max_channel_name_length")]
    pub max_channel_name_length: usize,
    #[serde(default = "default_max_event_name_length")]
    pub max_event_name_length: usize,
    #[serde(default = "default_rate_limit_messages")]
    pub rate_limit_messages: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_connections_per_ip: default_max_connections_per_ip(),
            max_connections_per_app: default_max_connections_per_app(),
            max_message_size: default_max_message_size(),
            max_channels_per_socket: default_max_channels_per_socket(),
            max_sockets_per_channel: default_max_sockets_per_channel(),
            max_channel_name_length: default_max_channel_name_length(),
            max_event_name_length: default_max_event_name_length(),
            rate_limit_messages: default_rate_limit_messages(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

fn default_max_connections() -> usize {
    100_000
}
fn default_max_connections_per_ip() -> usize {
    100
}
fn default_max_connections_per_app() -> usize {
    20_000
}
fn default_max_message_size() -> usize {
    10 * 1024
}
fn default_max_channels_per_socket() -> usize {
    100
}
fn default_max_sockets_per_channel() -> usize {
    100_000
}
fn default_max_channel_name_length() -> usize {
    200
}
fn default_max_event_name_length() -> usize {
    200
}
fn default_rate_limit_messages() -> u32 {
    100
}
fn default_rate_limit_window_secs() -> u64 {
    10
}
fn default_outbound_queue_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub starttls: bool,
    pub sender: Option<String>,
}

impl Default for PushiConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            smtp: SmtpConfig::default(),
        }
    }
}

impl PushiConfig {
    /// Loads a TOML config file, if present, then applies environment
    /// overrides. Matches the teacher's `SystemConfig::load` shape, split
    /// into "file defaults, then env wins" the way `acp-server.rs` layers
    /// CLI flags over file config.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) if std::path::Path::new(p).exists() => {
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        use std::env;

        if let Ok(v) = env::var("APP_HOST").or_else(|_| env::var("SERVER_HOST")) {
            self.server.host = v;
        }
        if let Ok(v) = env::var("APP_PORT") {
            if let Ok(p) = v.parse() {
                self.server.app_port = p;
            }
        }
        if let Ok(v) = env::var("SERVER_PORT") {
            if let Ok(p) = v.parse() {
                self.server.control_port = p;
            }
        }
        if let Ok(v) = env::var("APP_SSL").or_else(|_| env::var("SERVER_SSL")) {
            self.server.ssl = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = env::var("APP_SSL_KEY").or_else(|_| env::var("SERVER_SSL_KEY")) {
            self.server.ssl_key = Some(v);
        }
        if let Ok(v) = env::var("APP_SSL_CER").or_else(|_| env::var("SERVER_SSL_CER")) {
            self.server.ssl_cer = Some(v);
        }

        if let Ok(v) = env::var("SMTP_URL") {
            self.smtp.url = Some(v);
        }
        if let Ok(v) = env::var("SMTP_HOST") {
            self.smtp.host = Some(v);
        }
        if let Ok(v) = env::var("SMTP_PORT") {
            self.smtp.port = v.parse().ok();
        }
        if let Ok(v) = env::var("SMTP_USER") {
            self.smtp.user = Some(v);
        }
        if let Ok(v) = env::var("SMTP_PASSWORD") {
            self.smtp.password = Some(v);
        }
        if let Ok(v) = env::var("SMTP_STARTTLS") {
            self.smtp.starttls = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = env::var("SMTP_SENDER") {
            self.smtp.sender = Some(v);
        }

        macro_rules! env_usize {
            ($var:literal, $field:expr) => {
                if let Ok(v) = env::var($var) {
                    if let Ok(n) = v.parse() {
                        $field = n;
                    }
                }
            };
        }

        env_usize!(
            "PUSHI_MAX_CONNECTIONS_GLOBAL",
            self.limits.max_connections
        );
        env_usize!(
            "PUSHI_MAX_CONNECTIONS_PER_IP",
            self.limits.max_connections_per_ip
        );
        env_usize!(
            "PUSHI_MAX_CONNECTIONS_PER_APP",
            self.limits.max_connections_per_app
        );
        env_usize!("PUSHI_MAX_MESSAGE_SIZE", self.limits.max_message_size);
        env_usize!(
            "PUSHI_MAX_CHANNELS_PER_SOCKET",
            self.limits.max_channels_per_socket
        );
        env_usize!(
            "PUSHI_MAX_SOCKETS_PER_CHANNEL",
            self.limits.max_sockets_per_channel
        );
        env_usize!(
            "PUSHI_MAX_CHANNEL_NAME_LENGTH",
            self.limits.max_channel_name_length
        );
        env_usize!(
            "PUSHI_MAX_EVENT_NAME_LENGTH",
            self.limits.max_event_name_length
        );

        if let Ok(v) = env::var("PUSHI_RATE_LIMIT_MESSAGES") {
            if let Ok(n) = v.parse() {
                self.limits.rate_limit_messages = n;
            }
        }
        if let Ok(v) = env::var("PUSHI_RATE_LIMIT_WINDOW_SECS") {
            if let Ok(n) = v.parse() {
                self.limits.rate_limit_window_secs = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PushiConfig::default();
        assert_eq!(config.server.app_port, 9090);
        assert!(config.limits.max_connections > 0);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = PushiConfig::load(Some("/nonexistent/path.toml")).unwrap();
        assert_eq!(config.server.host, default_host());
    }
}
