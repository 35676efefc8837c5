//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tollgate_gate::{ConfigError, GateConfig};

/// Listener used when neither the file nor the command line names one.
pub const DEFAULT_TCP_ADDR: &str = "127.0.0.1:3563";

#[derive(Parser)]
#[command(name = "tollgate", about = "Message gateway for TCP and WebSocket clients")]
pub struct Cli {
    /// Gate config file (TOML)
    #[arg(long, short = 'c', global = true, env = "TOLLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway until ctrl-c / SIGTERM
    Serve(ServeOpts),
    /// Send pings to a running gateway over TCP
    Ping(PingOpts),
}

#[derive(clap::Args, Default)]
pub struct ServeOpts {
    /// TCP listen address
    #[arg(long, env = "TOLLGATE_TCP_ADDR")]
    pub tcp_addr: Option<String>,

    /// WebSocket listen address
    #[arg(long, env = "TOLLGATE_WS_ADDR")]
    pub ws_addr: Option<String>,

    /// Maximum concurrent connections per listener
    #[arg(long, env = "TOLLGATE_MAX_CONN_NUM")]
    pub max_conn_num: Option<usize>,

    /// Maximum message size in bytes
    #[arg(long, env = "TOLLGATE_MAX_MSG_LEN")]
    pub max_msg_len: Option<u32>,
}

#[derive(clap::Args)]
pub struct PingOpts {
    /// Gateway TCP address
    #[arg(long, default_value = DEFAULT_TCP_ADDR)]
    pub addr: String,

    /// Number of pings to send
    #[arg(long, default_value = "4")]
    pub count: u32,
}

/// Load the config file if one is given, defaults otherwise.
pub fn load_config(path: Option<&PathBuf>) -> Result<GateConfig, ConfigError> {
    match path {
        Some(path) => GateConfig::load(path),
        None => Ok(GateConfig::default()),
    }
}

impl ServeOpts {
    /// Command-line and environment values win over the file.
    pub fn apply(&self, mut config: GateConfig) -> GateConfig {
        if let Some(addr) = &self.tcp_addr {
            config.tcp_addr = Some(addr.clone());
        }
        if let Some(addr) = &self.ws_addr {
            config.ws_addr = Some(addr.clone());
        }
        if let Some(max) = self.max_conn_num {
            config.max_conn_num = max;
        }
        if let Some(max) = self.max_msg_len {
            config.max_msg_len = max;
        }
        if config.tcp_addr.is_none() && config.ws_addr.is_none() {
            config.tcp_addr = Some(DEFAULT_TCP_ADDR.to_owned());
        }
        config
    }
}
