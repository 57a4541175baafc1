//! NextGCore Application Framework Library
//!
//! YAML configuration model for NextGCore network functions.

pub mod config;

pub use config::{
    ConfigError, GtpuResourceConf, LoggerConf, MaxConf, OgsAppConfig, ParameterConf,
    PfcpClientConf, PfcpConf, PfcpRole, PfcpServerConf, PfcpTimeConf, TimeConf,
    UpFunctionFeaturesConf, MAX_NUM_OF_PEER, MAX_NUM_OF_SESS, OGS_PFCP_UDP_PORT,
};
