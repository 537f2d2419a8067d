use crate::cover::{CoverRelays, OutputAddress};
use crate::error::{Error, NetResult};
use crate::snapshot::{MODULE_COUNT, OUTPUT_COUNT};
use hashbrown::HashMap;
use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

/// What a device does, which decides how its byte value is interpreted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Switch,
    Light,
    Dimmer,
}

impl DeviceKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Switch => "switch",
            DeviceKind::Light => "light",
            DeviceKind::Dimmer => "dimmer",
        }
    }
}

/// Which half of a shutter pair a relay drives.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayRole {
    Up,
    Down,
}

impl RelayRole {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayRole::Up => "up",
            RelayRole::Down => "down",
        }
    }
}

/// Wire encoding of a level. Most modules use the full byte range with 255
/// as on; the EXO DIM module carries percent values 0..100 directly.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireScale {
    Byte,
    Percent,
}

impl Default for WireScale {
    fn default() -> WireScale {
        WireScale::Byte
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Category {
    Lights,
    Switches,
    Shutters,
}

impl Category {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Lights => "lights",
            Category::Switches => "switches",
            Category::Shutters => "shutters",
        }
    }
}

/// One configured device: a module/output address plus interpretation
/// metadata. Shutter halves additionally name their role and their paired
/// relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub module: u8,
    pub output: u8,
    pub kind: DeviceKind,
    pub name: String,
    #[serde(default)]
    pub scale: WireScale,
    #[serde(default)]
    pub relay_role: Option<RelayRole>,
    #[serde(default)]
    pub paired_device: Option<String>,
}

impl DeviceEntry {
    /// Wire level for fully on.
    #[inline]
    pub fn level_on(&self) -> u8 {
        match self.scale {
            WireScale::Percent => 100,
            WireScale::Byte => 255,
        }
    }

    /// Wire level for a 0..=100 percent setting.
    pub fn level_from_percent(&self, percent: u8) -> NetResult<u8> {
        if percent > 100 {
            return Err(Error::OutOfRange {
                what: "percent",
                value: percent as i64,
            });
        }

        Ok(match self.scale {
            WireScale::Percent => percent,
            WireScale::Byte => ((percent as u16 * 255) / 100) as u8,
        })
    }

    /// Percent reading of a wire level.
    pub fn percent_from_level(&self, level: u8) -> u8 {
        match self.scale {
            WireScale::Percent => level.min(100),
            WireScale::Byte => ((level as u32 * 100) / 255) as u8,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceFile {
    #[serde(default)]
    lights: IndexMap<String, DeviceEntry>,
    #[serde(default)]
    switches: IndexMap<String, DeviceEntry>,
    #[serde(default)]
    shutters: IndexMap<String, DeviceEntry>,
}

/// The configured device inventory: key to entry plus a reverse index from
/// bus address to key. The engine itself never consults this; the cover
/// layer and the observation stream do.
pub struct DeviceMap {
    devices: IndexMap<String, (Category, DeviceEntry)>,
    by_address: HashMap<(u8, u8), String>,
}

impl DeviceMap {
    pub fn load<P: AsRef<Path>>(path: P) -> NetResult<DeviceMap> {
        let file: DeviceFile =
            serdeconv::from_toml_file(path).map_err(|err| Error::Config(err.to_string()))?;
        Self::from_file(file)
    }

    pub fn from_toml_str(toml: &str) -> NetResult<DeviceMap> {
        let file: DeviceFile =
            serdeconv::from_toml_str(toml).map_err(|err| Error::Config(err.to_string()))?;
        Self::from_file(file)
    }

    fn from_file(file: DeviceFile) -> NetResult<DeviceMap> {
        let mut devices = IndexMap::new();
        let mut by_address = HashMap::new();

        let categories = vec![
            (Category::Lights, file.lights),
            (Category::Switches, file.switches),
            (Category::Shutters, file.shutters),
        ];

        for (category, entries) in categories {
            for (key, entry) in entries {
                if entry.module < 1 || entry.module as usize > MODULE_COUNT {
                    return Err(Error::Config(format!(
                        "device {} has module {} outside 1..=16",
                        key, entry.module
                    )));
                }
                if entry.output < 1 || entry.output as usize > OUTPUT_COUNT {
                    return Err(Error::Config(format!(
                        "device {} has output {} outside 1..=8",
                        key, entry.output
                    )));
                }

                let address = (entry.module, entry.output);
                if let Some(existing) = by_address.insert(address, key.clone()) {
                    return Err(Error::Config(format!(
                        "module {} output {} mapped to both {} and {}",
                        entry.module, entry.output, existing, key
                    )));
                }

                devices.insert(key, (category, entry));
            }
        }

        Ok(DeviceMap {
            devices,
            by_address,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn get(&self, key: &str) -> Option<(Category, &DeviceEntry)> {
        self.devices
            .get(key)
            .map(|(category, entry)| (*category, entry))
    }

    /// Reverse lookup from a bus address to the device key.
    pub fn key_at(&self, module: u8, output: u8) -> Option<&str> {
        self.by_address
            .get(&(module, output))
            .map(|key| key.as_str())
    }

    /// All devices in declaration order, sorted by module then output.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Category, &DeviceEntry)> {
        self.devices
            .iter()
            .map(|(key, (category, entry))| (key.as_str(), *category, entry))
    }

    /// Resolves a shutter key (either half) into the relay pair for the
    /// cover layer.
    pub fn cover_relays(&self, key: &str) -> NetResult<CoverRelays> {
        let (category, entry) = self
            .get(key)
            .ok_or_else(|| Error::Config(format!("unknown device {}", key)))?;

        if category != Category::Shutters {
            return Err(Error::Config(format!(
                "device {} is not a shutter (category {})",
                key,
                category.as_str()
            )));
        }

        let role = entry
            .relay_role
            .ok_or_else(|| Error::Config(format!("shutter {} is missing relay_role", key)))?;
        let paired_key = entry
            .paired_device
            .as_ref()
            .ok_or_else(|| Error::Config(format!("shutter {} is missing paired_device", key)))?;

        let (paired_category, paired) = self
            .get(paired_key)
            .ok_or_else(|| Error::Config(format!("paired device {} not found", paired_key)))?;

        if paired_category != Category::Shutters {
            return Err(Error::Config(format!(
                "paired device {} is not a shutter",
                paired_key
            )));
        }

        let this = OutputAddress {
            module: entry.module,
            output: entry.output,
        };
        let other = OutputAddress {
            module: paired.module,
            output: paired.output,
        };

        let (up, down) = match role {
            RelayRole::Up => (this, other),
            RelayRole::Down => (other, this),
        };

        Ok(CoverRelays {
            up,
            down,
            drive_level: entry.level_on(),
        })
    }
}
