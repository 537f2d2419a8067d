use ipcom::config::{ClientConfig, DEFAULT_PORT};
use ipcom::error::{Error, NetResult};
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

/// Which gateway endpoint(s) the supervisor may use. In `Both` mode it
/// alternates after failures.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionPreference {
    LocalOnly,
    RemoteOnly,
    Both,
}

impl Default for ConnectionPreference {
    fn default() -> ConnectionPreference {
        ConnectionPreference::LocalOnly
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Endpoint {
        Endpoint {
            host: String::new(),
            port: DEFAULT_PORT,
        }
    }
}

/// Daemon configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub local: Endpoint,
    pub remote: Endpoint,
    pub username: String,
    pub password: String,
    pub preference: ConnectionPreference,
    pub devices_file: String,
    /// Session is considered dead after this many seconds without inbound
    /// bytes.
    pub connection_timeout_secs: u64,
    pub restart_base_delay_secs: u64,
    pub restart_max_delay_secs: u64,
    pub bus_number: u8,
    pub exo_bus: u8,
    pub exo_address_base: u8,
    pub connect_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> DaemonConfig {
        DaemonConfig {
            local: Endpoint::default(),
            remote: Endpoint::default(),
            username: String::new(),
            password: String::new(),
            preference: ConnectionPreference::default(),
            devices_file: "devices.toml".into(),
            connection_timeout_secs: 120,
            restart_base_delay_secs: 5,
            restart_max_delay_secs: 300,
            bus_number: 1,
            exo_bus: 2,
            exo_address_base: 60,
            connect_timeout_secs: 5,
        }
    }
}

impl DaemonConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> NetResult<DaemonConfig> {
        let config: DaemonConfig =
            serdeconv::from_toml_file(path).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NetResult<()> {
        let needs_local = self.preference != ConnectionPreference::RemoteOnly;
        let needs_remote = self.preference != ConnectionPreference::LocalOnly;

        if needs_local && self.local.host.is_empty() {
            return Err(Error::Config("local endpoint host is empty".into()));
        }
        if needs_remote && self.remote.host.is_empty() {
            return Err(Error::Config("remote endpoint host is empty".into()));
        }
        if self.username.is_empty() {
            return Err(Error::Config("username is empty".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Config("password is empty".into()));
        }
        Ok(())
    }

    /// Client settings for one endpoint.
    pub fn client_config(&self, endpoint: &Endpoint) -> ClientConfig {
        ClientConfig {
            host: endpoint.host.clone(),
            port: endpoint.port,
            username: self.username.clone(),
            password: self.password.clone(),
            bus_number: self.bus_number,
            exo_bus: self.exo_bus,
            exo_address_base: self.exo_address_base,
            connect_timeout_secs: self.connect_timeout_secs,
        }
    }
}
