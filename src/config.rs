//! Configuration types for tailnet-dns.

use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::DnsError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Membership source configuration.
    #[serde(default)]
    pub membership: MembershipConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zone served by this authority (e.g., "tailnet.example.com").
    /// Member hostnames are single labels below it.
    pub zone: String,

    /// TTL for DNS records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Zones for which unanswered queries are handed to the next authority.
    ///
    /// `None` disables fallthrough. An empty list falls through for every zone.
    #[serde(default)]
    pub fallthrough: Option<Vec<String>>,

    /// SOA record configuration.
    #[serde(default)]
    pub soa: SoaConfig,
}

impl DnsConfig {
    /// Check that the zone and fallthrough zones are valid DNS names.
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.zone.trim_end_matches('.').is_empty() {
            return Err(DnsError::Config("dns.zone must not be empty".to_string()));
        }
        Name::from_ascii(&self.zone)
            .map_err(|e| DnsError::Config(format!("dns.zone {:?}: {}", self.zone, e)))?;

        for zone in self.fallthrough.iter().flatten() {
            Name::from_ascii(zone).map_err(|e| {
                DnsError::Config(format!("dns.fallthrough entry {:?}: {}", zone, e))
            })?;
        }

        Ok(())
    }
}

/// Membership source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Status endpoint returning `tailscale status --json` shaped data.
    #[serde(default = "default_status_url")]
    pub status_url: String,

    /// IPN bus endpoint streaming newline-delimited netmap notifications.
    ///
    /// When set, membership follows the stream and `status_url` is polled only
    /// while the stream cannot be opened. An empty string disables watching.
    #[serde(default = "default_watch_url")]
    pub watch_url: Option<String>,

    /// Optional LocalAPI token, sent as the basic-auth password.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Seconds between successful polls.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Seconds to wait before retrying after a source failure.
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl MembershipConfig {
    /// Interval between successful refreshes.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Fixed backoff after a failed refresh.
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    /// Timeout applied to each status request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            status_url: default_status_url(),
            watch_url: default_watch_url(),
            auth_token: None,
            refresh_interval_secs: default_refresh_interval(),
            reconnect_backoff_secs: default_reconnect_backoff(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "tailnet_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "tailnet-dns".to_string()
}

/// SOA (Start of Authority) record configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaConfig {
    /// Primary nameserver hostname (e.g., "ns1.example.com").
    pub mname: String,

    /// Admin email in DNS format (e.g., "admin.example.com" for admin@example.com).
    pub rname: String,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Minimum TTL in seconds.
    #[serde(default = "default_minimum")]
    pub minimum: u32,
}

fn default_ttl() -> u32 {
    60
}

fn default_status_url() -> String {
    "http://127.0.0.1:41112/localapi/v0/status".to_string()
}

fn default_watch_url() -> Option<String> {
    // mask=8 asks for the initial netmap on connect
    Some("http://127.0.0.1:41112/localapi/v0/watch-ipn-bus?mask=8".to_string())
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_reconnect_backoff() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    10
}

fn default_refresh() -> u32 {
    3600
}

fn default_retry() -> u32 {
    600
}

fn default_expire() -> u32 {
    604800
}

fn default_minimum() -> u32 {
    60
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            mname: "ns1.example.com".to_string(),
            rname: "admin.example.com".to_string(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            minimum: default_minimum(),
        }
    }
}
