//! Configuration Management
//!
//! YAML configuration for the PFCP agent, modelled on lib/app/ogs-config.c.
//! Every PFCP timer is derived from a single message wait duration, the same
//! way `regenerate_all_timer_duration()` does it.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Well-known PFCP port
pub const OGS_PFCP_UDP_PORT: u16 = 8805;

/// Default maximum number of sessions
pub const MAX_NUM_OF_SESS: usize = 1024;
/// Default maximum number of peers
pub const MAX_NUM_OF_PEER: usize = 64;

/// Default message wait duration in milliseconds
pub const DEFAULT_MESSAGE_DURATION_MS: u64 = 10_000;

const PFCP_N1_RESPONSE_RETRY_COUNT: u32 = 3;
const PFCP_N1_HOLDING_RETRY_COUNT: u32 = 1;

/// PFCP message time configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfcpTimeConf {
    /// Wait for a response before retransmitting (T1)
    pub t1_response_duration: Duration,
    /// Number of transmissions of a request (N1)
    pub n1_response_rcount: u32,
    /// Keep an answered transaction for duplicate suppression
    pub t1_holding_duration: Duration,
    pub n1_holding_rcount: u32,
    /// Association setup retry interval
    pub association_interval: Duration,
    /// Silence tolerated before a heartbeat is sent
    pub no_heartbeat_duration: Duration,
}

impl PfcpTimeConf {
    /// Derive all PFCP timers from the message wait duration.
    pub fn from_message_duration(duration: Duration) -> Self {
        let t1_response_duration = duration / (PFCP_N1_RESPONSE_RETRY_COUNT + 1);

        PfcpTimeConf {
            t1_response_duration,
            n1_response_rcount: PFCP_N1_RESPONSE_RETRY_COUNT,
            t1_holding_duration: t1_response_duration * PFCP_N1_RESPONSE_RETRY_COUNT,
            n1_holding_rcount: PFCP_N1_HOLDING_RETRY_COUNT,
            association_interval: std::cmp::max(
                Duration::from_secs(3),
                duration + Duration::from_secs(1),
            ),
            no_heartbeat_duration: std::cmp::max(
                Duration::from_secs(10),
                duration + Duration::from_secs(1),
            ),
        }
    }
}

impl Default for PfcpTimeConf {
    fn default() -> Self {
        Self::from_message_duration(Duration::from_millis(DEFAULT_MESSAGE_DURATION_MS))
    }
}

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConf {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggerConf {
    fn default() -> Self {
        LoggerConf {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Parameter flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterConf {
    pub prefer_ipv4: bool,
}

impl Default for ParameterConf {
    fn default() -> Self {
        ParameterConf { prefer_ipv4: true }
    }
}

/// Capacity limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxConf {
    pub sess: usize,
    pub peer: usize,
}

impl Default for MaxConf {
    fn default() -> Self {
        MaxConf {
            sess: MAX_NUM_OF_SESS,
            peer: MAX_NUM_OF_PEER,
        }
    }
}

/// Optional per-timer overrides, in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PfcpTimeOverride {
    pub t1_response: Option<u64>,
    pub n1_response_rcount: Option<u32>,
    pub t1_holding: Option<u64>,
    pub association_interval: Option<u64>,
    pub no_heartbeat_duration: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTimeConf {
    /// Message wait duration in milliseconds
    pub duration: u64,
}

impl Default for MessageTimeConf {
    fn default() -> Self {
        MessageTimeConf {
            duration: DEFAULT_MESSAGE_DURATION_MS,
        }
    }
}

/// Time configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConf {
    pub message: MessageTimeConf,
    pub pfcp: PfcpTimeOverride,
}

/// Which side of the PFCP interface this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PfcpRole {
    #[default]
    Cp,
    Up,
}

/// A local PFCP listening address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PfcpServerConf {
    pub address: IpAddr,
    pub port: Option<u16>,
}

impl PfcpServerConf {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port.unwrap_or(OGS_PFCP_UDP_PORT))
    }
}

/// A PFCP peer this process associates with on startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PfcpClientConf {
    pub address: IpAddr,
    pub port: Option<u16>,
}

impl PfcpClientConf {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port.unwrap_or(OGS_PFCP_UDP_PORT))
    }
}

/// GTP-U resource advertised by a user plane without F-TEID allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtpuResourceConf {
    pub address: Vec<IpAddr>,
    #[serde(default)]
    pub teid_range_indication: u8,
    #[serde(default)]
    pub teid_range: u8,
    pub network_instance: Option<String>,
    pub source_interface: Option<u8>,
}

/// UP function features advertised in association setup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpFunctionFeaturesConf {
    pub ftup: bool,
    pub bucp: bool,
    pub ddnd: bool,
    pub dlbd: bool,
    pub trst: bool,
    pub empu: bool,
}

/// PFCP section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PfcpConf {
    pub role: PfcpRole,
    pub server: Vec<PfcpServerConf>,
    pub client: Vec<PfcpClientConf>,
    pub release_sessions_on_failure: bool,
    pub up_function_features: UpFunctionFeaturesConf,
    pub gtpu_resource: Vec<GtpuResourceConf>,
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OgsAppConfig {
    pub logger: LoggerConf,
    pub parameter: ParameterConf,
    pub max: MaxConf,
    pub time: TimeConf,
    pub pfcp: PfcpConf,
}

impl OgsAppConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let conf: OgsAppConfig = serde_yaml::from_str(yaml)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Read and parse a YAML file (ogs_app_config_read).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        log::debug!(
            "Configuration file {} loaded ({} bytes)",
            path.as_ref().display(),
            content.len()
        );
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time.message.duration == 0 {
            return Err(ConfigError::ValidationError(
                "time.message.duration should not be 0".to_string(),
            ));
        }
        if self.max.sess == 0 || self.max.peer == 0 {
            return Err(ConfigError::ValidationError(
                "max.sess and max.peer should not be 0".to_string(),
            ));
        }
        if self.pfcp.server.is_empty() {
            return Err(ConfigError::ValidationError(
                "No pfcp.server address".to_string(),
            ));
        }
        if self.time.pfcp.n1_response_rcount == Some(0) {
            return Err(ConfigError::ValidationError(
                "time.pfcp.n1_response_rcount should not be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// PFCP timers after applying overrides.
    pub fn pfcp_time(&self) -> PfcpTimeConf {
        let mut conf =
            PfcpTimeConf::from_message_duration(Duration::from_millis(self.time.message.duration));
        let o = &self.time.pfcp;
        if let Some(ms) = o.t1_response {
            conf.t1_response_duration = Duration::from_millis(ms);
        }
        if let Some(count) = o.n1_response_rcount {
            conf.n1_response_rcount = count;
        }
        if let Some(ms) = o.t1_holding {
            conf.t1_holding_duration = Duration::from_millis(ms);
        }
        if let Some(ms) = o.association_interval {
            conf.association_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = o.no_heartbeat_duration {
            conf.no_heartbeat_duration = Duration::from_millis(ms);
        }
        conf
    }

    /// First configured IPv4 and IPv6 server addresses.
    pub fn pfcp_addrs(&self) -> (Option<SocketAddr>, Option<SocketAddr>) {
        let addr4 = self
            .pfcp
            .server
            .iter()
            .map(PfcpServerConf::socket_addr)
            .find(SocketAddr::is_ipv4);
        let addr6 = self
            .pfcp
            .server
            .iter()
            .map(PfcpServerConf::socket_addr)
            .find(SocketAddr::is_ipv6);
        (addr4, addr6)
    }
}
