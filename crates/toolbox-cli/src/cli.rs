use std::path::PathBuf;

use clap::Parser;
use toolbox_core::config::{ConfigError, ConnectionConfig, TcpOptions, ToolboxConfig};

#[derive(Debug, Parser)]
#[command(name = "toolbox", about = "Run automation scripts against a shared device channel")]
pub struct Cli {
    /// TCP connection host
    #[arg(long)]
    host: Option<String>,
    /// TCP port
    #[arg(long)]
    port: Option<u16>,
    /// Remote via tag (TCP)
    #[arg(long)]
    via_tag: Option<String>,
    /// Adapter password (TCP)
    #[arg(long)]
    password: Option<String>,
    /// Bus channel number (TCP)
    #[arg(long)]
    channel: Option<u8>,
    /// Serial port path
    #[arg(long)]
    path: Option<PathBuf>,
    /// In-process loopback channel
    #[arg(long = "virtual")]
    virtual_channel: bool,
    /// Specification file handed to scripts
    #[arg(long)]
    vsf: Option<PathBuf>,
    /// Load a script (repeatable)
    #[arg(long = "script", value_name = "NAME")]
    scripts: Vec<String>,
    /// JSON config file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the built-in scripts and exit
    #[arg(long)]
    pub list_scripts: bool,
    /// Open an interactive console next to the running scripts
    #[arg(long)]
    pub repl: bool,
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    /// Merge the flags over the config file (if any).
    pub fn into_config(self) -> Result<ToolboxConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ToolboxConfig::from_file(path)?,
            None => ToolboxConfig::default(),
        };

        let wants_tcp = self.host.is_some()
            || self.port.is_some()
            || self.via_tag.is_some()
            || self.password.is_some()
            || self.channel.is_some();
        if wants_tcp {
            let requested = ConnectionConfig::Tcp(TcpOptions::new(self.host.clone().unwrap_or_default()));
            if let ConnectionConfig::Tcp(tcp) = config.connection_mut(requested)? {
                if let Some(host) = self.host {
                    tcp.host = host;
                }
                if let Some(port) = self.port {
                    tcp.port = port;
                }
                if self.via_tag.is_some() {
                    tcp.via_tag = self.via_tag;
                }
                if self.password.is_some() {
                    tcp.password = self.password;
                }
                if self.channel.is_some() {
                    tcp.channel = self.channel;
                }
            }
        }
        if let Some(path) = self.path {
            let requested = ConnectionConfig::Serial { path: path.clone() };
            if let ConnectionConfig::Serial { path: existing } = config.connection_mut(requested)? {
                *existing = path;
            }
        }
        if self.virtual_channel {
            config.connection_mut(ConnectionConfig::Virtual)?;
        }

        if self.vsf.is_some() {
            config.vsf = self.vsf;
        }
        config.scripts.extend(self.scripts);

        match &config.connection {
            None => return Err(ConfigError::MissingConnection),
            Some(ConnectionConfig::Tcp(tcp)) if tcp.host.trim().is_empty() => {
                return Err(ConfigError::MissingTcpHost);
            }
            Some(_) => {}
        }
        Ok(config)
    }
}
