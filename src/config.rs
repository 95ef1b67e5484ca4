use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use gbxremote::{RemoteConfig, SERVER_API_VERSION};

/// The environment variable pointing at the config file.
pub const CONFIG_ENV_VAR: &str = "ADJUTANT_CONFIG";

/// Client config, listing every server the operator may administrate.
///
/// ```toml
/// [[servers]]
/// name     = "dev"
/// host     = "127.0.0.1"
/// port     = 5000
/// username = "SuperAdmin"
/// password = "SuperAdmin"
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    pub servers: Vec<ServerEntry>,
}

/// Connection options of one configured server.
#[derive(Debug, Deserialize)]
pub struct ServerEntry {
    /// The name this entry is selected by on the command line.
    pub name: String,

    /// DNS name or literal address of the game server.
    pub host: String,

    /// The XML-RPC port. A game server will listen on the port 5000 by
    /// default, where each additional instance will use 5001, 5002, etc.
    /// It is also possible to select a specific port, using the
    /// `<xmlrpc_port>` setting in the server config.
    pub port: u16,

    /// The "SuperAdmin" login defined in the `<authorization_levels>`
    /// server config in `/UserData/Config/*.txt`.
    pub username: String,

    /// The "SuperAdmin" password defined in the `<authorization_levels>`
    /// server config in `/UserData/Config/*.txt`.
    pub password: String,

    /// The callback API version to request.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// How many reconnection attempts a failed call may spend.
    #[serde(default = "default_conn_retries")]
    pub conn_retries: u32,

    /// How long to await the result of each call, in seconds.
    #[serde(default = "default_result_timeout_secs")]
    pub result_timeout_secs: u64,
}

fn default_api_version() -> String {
    SERVER_API_VERSION.to_string()
}

fn default_conn_retries() -> u32 {
    3
}

fn default_result_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Read the config file listed in the `ADJUTANT_CONFIG` environment
    /// variable.
    pub fn load() -> Result<Config> {
        let path = Self::path()
            .ok_or_else(|| anyhow!("cannot locate config: use the '{}' env var", CONFIG_ENV_VAR))?;
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config =
            toml::from_str(&contents).context("failed to parse config file")?;
        if config.servers.is_empty() {
            return Err(anyhow!("the config lists no servers"));
        }
        Ok(config)
    }

    fn path() -> Option<PathBuf> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(f) => Some(PathBuf::from(f)).filter(|p| p.is_file()),
            Err(_) => None,
        }
    }

    /// The entry with the given name; without a name, the sole
    /// configured server, if there is exactly one.
    pub fn select(&self, name: Option<&str>) -> Option<&ServerEntry> {
        match name {
            Some(name) => self.servers.iter().find(|entry| entry.name == name),
            None if self.servers.len() == 1 => self.servers.first(),
            None => None,
        }
    }
}

impl ServerEntry {
    pub fn remote_config(&self) -> RemoteConfig {
        let mut config = RemoteConfig::new(&self.host, self.port, &self.username, &self.password);
        config.api_version = self.api_version.clone();
        config.conn_retries = self.conn_retries;
        config.result_timeout = Duration::from_secs(self.result_timeout_secs);
        config
    }
}
