//! Gate configuration, loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tollgate_codec::{ByteOrder, MsgId, PayloadFormat, RegistryBuilder};
use tollgate_network::{
    DEFAULT_MAX_CONN_NUM, DEFAULT_MAX_MSG_LEN, DEFAULT_PENDING_WRITE_NUM, TcpServerConfig,
    WsServerConfig,
};

use crate::error::ConfigError;

/// Every field is optional in the file; missing ones take the defaults.
///
/// ```toml
/// tcp_addr = "0.0.0.0:3563"
/// ws_addr = "0.0.0.0:3653"
/// max_msg_len = 8192
/// payload_format = "json"
/// quiet_msg_ids = [1]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    pub max_conn_num: usize,
    pub pending_write_num: usize,
    pub max_msg_len: u32,
    /// TCP length prefix size: 1, 2 or 4.
    pub len_msg_len: usize,
    pub byte_order: ByteOrder,
    pub payload_format: PayloadFormat,
    pub tcp_addr: Option<String>,
    pub ws_addr: Option<String>,
    pub http_timeout_secs: u64,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Message ids left out of per-message trace logging.
    pub quiet_msg_ids: Vec<MsgId>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            len_msg_len: 2,
            byte_order: ByteOrder::BigEndian,
            payload_format: PayloadFormat::Postcard,
            tcp_addr: None,
            ws_addr: None,
            http_timeout_secs: 10,
            cert_file: None,
            key_file: None,
            quiet_msg_ids: Vec::new(),
        }
    }
}

impl GateConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// A registry builder whose wire settings match this config.
    pub fn registry_builder<C: 'static>(&self) -> RegistryBuilder<C> {
        RegistryBuilder::new()
            .with_byte_order(self.byte_order)
            .with_payload_format(self.payload_format)
            .with_quiet_ids(self.quiet_msg_ids.iter().copied())
    }

    pub(crate) fn tcp_server_config(&self, addr: &str) -> TcpServerConfig {
        TcpServerConfig {
            addr: addr.to_owned(),
            max_conn_num: self.max_conn_num,
            pending_write_num: self.pending_write_num,
            len_msg_len: self.len_msg_len,
            min_msg_len: 1,
            max_msg_len: self.max_msg_len,
            byte_order: self.byte_order,
        }
    }

    pub(crate) fn ws_server_config(&self, addr: &str) -> WsServerConfig {
        WsServerConfig {
            addr: addr.to_owned(),
            max_conn_num: self.max_conn_num,
            pending_write_num: self.pending_write_num,
            max_msg_len: self.max_msg_len,
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
        }
    }
}
