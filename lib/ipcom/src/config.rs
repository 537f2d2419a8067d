use crate::error::{Error, NetResult};
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Credential fields on the wire are 26 bytes: the `USER:`/`PWD:` prefix
/// plus the value, space padded.
const MAX_USERNAME_LEN: usize = 21;
const MAX_PASSWORD_LEN: usize = 22;

/// Connection settings for one gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Bus number reported in the handshake.
    pub bus_number: u8,
    /// Bus prefix byte for output writes; zero omits the prefix.
    pub exo_bus: u8,
    /// Module address base for output writes.
    pub exo_address_base: u8,
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            host: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: String::new(),
            bus_number: 1,
            exo_bus: 2,
            exo_address_base: 60,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> NetResult<ClientConfig> {
        let config: ClientConfig =
            serdeconv::from_toml_file(path).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would fail on the wire before any I/O happens.
    pub fn validate(&self) -> NetResult<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host is empty".into()));
        }
        if self.username.is_empty() {
            return Err(Error::Config("username is empty".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Config("password is empty".into()));
        }
        if self.username.len() > MAX_USERNAME_LEN {
            return Err(Error::Config(format!(
                "username exceeds {} bytes",
                MAX_USERNAME_LEN
            )));
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(Error::Config(format!(
                "password exceeds {} bytes",
                MAX_PASSWORD_LEN
            )));
        }
        if self.exo_address_base.checked_add(15).is_none() {
            return Err(Error::Config("exo_address_base too large".into()));
        }
        Ok(())
    }

    #[inline]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
