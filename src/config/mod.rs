use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fixture::{FixtureSpec, UNIVERSE_SIZE};
use crate::host::udpclient::DEFAULT_COMMAND_PORT;
use crate::parser::E131_PORT;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Root {
    /// E1.31 receiver configuration.
    pub receiver: Receiver,
    /// Outbound fixture commands.
    pub dispatch: Dispatch,
    /// Fixtures to register at startup.
    pub fixtures: Vec<FixtureSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Receiver {
    /// Address to bind the E1.31 socket to.
    pub bind_addr: String,
    /// Join the E1.31 multicast groups. Off means unicast only.
    pub join_multicast: bool,
    /// Local interface address used for multicast membership.
    pub interface: String,
    /// Universes whose multicast groups are joined in addition to the ones
    /// used by registered fixtures.
    pub universes: Vec<u16>,
    /// Socket read timeout; bounds how long `stop()` takes to be noticed.
    pub read_timeout_ms: u64,
    /// How long `stop()` waits for the receive thread.
    pub stop_timeout_ms: u64,
    /// Fixtures not fed any data for this long are reported offline.
    pub fixture_timeout_secs: u64,
}

impl Default for Receiver {
    fn default() -> Receiver {
        Receiver {
            bind_addr: format!("0.0.0.0:{}", E131_PORT),
            join_multicast: true,
            interface: "0.0.0.0".to_string(),
            universes: vec![],
            read_timeout_ms: 250,
            stop_timeout_ms: 1000,
            fixture_timeout_secs: 30,
        }
    }
}

impl Receiver {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn fixture_timeout(&self) -> Duration {
        Duration::from_secs(self.fixture_timeout_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Dispatch {
    /// Local address for the command socket.
    pub bind_addr: String,
    /// UDP port fixtures accept commands on.
    pub port: u16,
}

impl Default for Dispatch {
    fn default() -> Dispatch {
        Dispatch {
            bind_addr: "0.0.0.0:0".to_string(),
            port: DEFAULT_COMMAND_PORT,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config: {0}")]
    Io(#[from] io::Error),
    #[error("unable to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn read_config_yaml<T: AsRef<Path>>(path: T) -> Result<Root, ConfigError> {
    let file = fs::File::open(path)?;
    let reader = io::BufReader::new(file);
    let root: Root = serde_yaml::from_reader(reader)?;
    validate(&root)?;
    Ok(root)
}

/// Quick sanity check for the configuration.
pub fn validate(root: &Root) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();
    for spec in &root.fixtures {
        validate_fixture(spec)?;
        if !ids.insert(spec.id.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "fixture {} is defined twice",
                spec.id
            )));
        }
    }
    if root.receiver.universes.contains(&0) {
        return Err(ConfigError::Invalid("universe 0 is not valid".to_string()));
    }
    Ok(())
}

/// Check that a fixture's addressing fits in a universe.
pub fn validate_fixture(spec: &FixtureSpec) -> Result<(), ConfigError> {
    let invalid = |why: String| -> Result<(), ConfigError> {
        Err(ConfigError::Invalid(format!("fixture {}: {}", spec.id, why)))
    };

    if spec.universe == 0 {
        return invalid("universe must be 1 or higher".to_string());
    }
    if spec.start_channel == 0 || spec.start_channel as usize > UNIVERSE_SIZE {
        return invalid(format!("start channel {} out of range", spec.start_channel));
    }
    if spec.led_count == 0 {
        return invalid("needs at least one LED".to_string());
    }
    let end = spec.start_channel as usize + spec.led_count as usize * 3 - 1;
    if end > UNIVERSE_SIZE {
        return invalid(format!("channels {}-{} do not fit", spec.start_channel, end));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureKind;
    use std::io::Write;

    const EXAMPLE: &str = r#"
receiver:
  bindAddr: "0.0.0.0:5568"
  universes: [1, 2]
  readTimeoutMs: 100
dispatch:
  port: 9999
fixtures:
  - id: TRICORDER_001
    address: 192.168.1.50
    kind: simple
    universe: 1
    startChannel: 1
    ledCount: 3
  - id: POLY_001
    address: 192.168.1.51
    kind: array
    universe: 1
    startChannel: 13
    ledCount: 5
"#;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_example_config() {
        let file = write_config(EXAMPLE);
        let root = read_config_yaml(file.path()).unwrap();

        assert_eq!(root.receiver.universes, vec![1, 2]);
        assert_eq!(root.receiver.read_timeout(), Duration::from_millis(100));
        // Unset fields fall back to defaults.
        assert!(root.receiver.join_multicast);
        assert_eq!(root.receiver.stop_timeout_ms, 1000);
        assert_eq!(root.dispatch.port, 9999);
        assert_eq!(root.dispatch.bind_addr, "0.0.0.0:0");

        assert_eq!(root.fixtures.len(), 2);
        assert_eq!(root.fixtures[1].kind, FixtureKind::Array);
        assert_eq!(root.fixtures[1].start_channel, 13);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let root: Root = serde_yaml::from_str("{}").unwrap();
        assert_eq!(root.receiver.bind_addr, "0.0.0.0:5568");
        assert_eq!(root.dispatch.port, 8888);
        assert!(root.fixtures.is_empty());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut root: Root = serde_yaml::from_str(EXAMPLE).unwrap();
        root.fixtures[1].id = "TRICORDER_001".to_string();
        assert!(matches!(validate(&root), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_fixture_past_universe_end() {
        let mut root: Root = serde_yaml::from_str(EXAMPLE).unwrap();
        root.fixtures[1].start_channel = 500;
        assert!(matches!(validate(&root), Err(ConfigError::Invalid(_))));
        root.fixtures[1].start_channel = 498; // 498..=512
        assert!(validate(&root).is_ok());
    }

    #[test]
    fn rejects_zero_universe_and_channel() {
        let mut root: Root = serde_yaml::from_str(EXAMPLE).unwrap();
        root.fixtures[0].universe = 0;
        assert!(validate(&root).is_err());
        root.fixtures[0].universe = 1;
        root.fixtures[0].start_channel = 0;
        assert!(validate(&root).is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_config_yaml("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn malformed_yaml_is_yaml_error() {
        let file = write_config("fixtures: [ {id: 1");
        assert!(matches!(
            read_config_yaml(file.path()),
            Err(ConfigError::Yaml(_))
        ));
    }
}
