//! Controller configuration, loaded from TOML.
//!
//! ```toml
//! [controller]
//! listen = "0.0.0.0:6633"
//! barrier_mode = "sync"
//!
//! [nat]
//! public_ip = "192.0.2.1"
//! min_port = 10000
//! max_port = 19999
//! inside = { switch = 1, port = 1 }
//! outside = { switch = 1, port = 2 }
//!
//! [[static_rules]]
//! switch = 2
//! priority = 10
//! in_port = 1
//! output = 2
//! ```

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionSettings;
use crate::error::ConfigError;
use crate::openflow0x01::{Action, Pattern, PseudoPort};
use crate::policy::{Rule, StaticPolicy, SwitchId};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,

    /// NAT is off unless this section is present.
    #[serde(default)]
    pub nat: Option<NatConfig>,

    #[serde(default)]
    pub static_rules: Vec<StaticRuleConfig>,
}

/// How the controller treats barriers it queues.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BarrierMode {
    /// Hold back everything queued after a barrier until the switch replies.
    #[default]
    Sync,
    /// Send the barrier and keep going.
    Async,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Address switches connect to.
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Encoded frames buffered per switch before sends report backpressure.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    #[serde(default)]
    pub barrier_mode: BarrierMode,

    /// How often queues held back by backpressure are retried.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_listen() -> String {
    "127.0.0.1:6633".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_outbound_buffer() -> usize {
    1024
}

fn default_tick_ms() -> u64 {
    50
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            outbound_buffer: default_outbound_buffer(),
            barrier_mode: BarrierMode::default(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            outbound_buffer: self.outbound_buffer,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// A switch port.
///
/// `uplink` is the port leading to the other NAT switch and is only needed
/// when the private and public sides sit on different switches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub switch: SwitchId,
    pub port: u16,
    #[serde(default)]
    pub uplink: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NatConfig {
    pub public_ip: Ipv4Addr,
    pub min_port: u16,
    pub max_port: u16,
    /// Where the private network attaches.
    pub inside: Location,
    /// Where the public network attaches.
    pub outside: Location,
}

/// Forward everything matching `in_port` (or everything) out of `output`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRuleConfig {
    pub switch: SwitchId,
    pub priority: u16,
    #[serde(default)]
    pub in_port: Option<u16>,
    pub output: u16,
}

impl StaticRuleConfig {
    pub fn to_rule(&self) -> Rule {
        let pattern = Pattern {
            in_port: self.in_port,
            ..Pattern::match_all()
        };
        Rule::new(
            self.priority,
            pattern,
            vec![Action::Output(PseudoPort::PhysicalPort(self.output))],
        )
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Config::parse(&contents)
    }

    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ctl = &self.controller;
        if ctl.outbound_buffer == 0 {
            return Err(ConfigError::Invalid("outbound_buffer must be non-zero".into()));
        }
        if ctl.tick_ms == 0 || ctl.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms and handshake_timeout_ms must be non-zero".into()));
        }
        if let Some(ref nat) = self.nat {
            if nat.min_port >= nat.max_port {
                return Err(ConfigError::Invalid(format!(
                    "nat port range {}..={} is empty",
                    nat.min_port, nat.max_port
                )));
            }
            let split = nat.inside.switch != nat.outside.switch;
            if split && (nat.inside.uplink.is_none() || nat.outside.uplink.is_none()) {
                return Err(ConfigError::Invalid(
                    "nat inside and outside on different switches need an uplink on both".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn static_policy(&self) -> StaticPolicy {
        let mut policy = StaticPolicy::new();
        for rule in &self.static_rules {
            policy.add_rule(rule.switch, rule.to_rule());
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ReactivePolicy;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.controller, ControllerConfig::default());
        assert_eq!(config.controller.listen, "127.0.0.1:6633");
        assert_eq!(config.controller.barrier_mode, BarrierMode::Sync);
        assert!(config.nat.is_none());
        assert!(config.static_rules.is_empty());
    }

    #[test]
    fn full_document() {
        let config = Config::parse(
            r#"
[controller]
listen = "0.0.0.0:6653"
barrier_mode = "async"
outbound_buffer = 16

[nat]
public_ip = "192.0.2.1"
min_port = 10000
max_port = 10999
inside = { switch = 1, port = 1, uplink = 3 }
outside = { switch = 2, port = 2, uplink = 4 }

[[static_rules]]
switch = 3
priority = 10
in_port = 1
output = 2
"#,
        )
        .unwrap();
        assert_eq!(config.controller.barrier_mode, BarrierMode::Async);
        assert_eq!(config.controller.outbound_buffer, 16);
        assert_eq!(config.controller.tick_ms, 50);
        let nat = config.nat.clone().unwrap();
        assert_eq!(nat.public_ip, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(nat.outside.uplink, Some(4));
        let rules = config.static_policy().compile(3);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].pattern.in_port, Some(1));
        assert_eq!(rules[0].actions, vec![Action::Output(PseudoPort::PhysicalPort(2))]);
    }

    #[test]
    fn rejects_bad_port_range() {
        let err = Config::parse(
            r#"
[nat]
public_ip = "192.0.2.1"
min_port = 5000
max_port = 5000
inside = { switch = 1, port = 1 }
outside = { switch = 1, port = 2 }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn split_nat_requires_uplinks() {
        let err = Config::parse(
            r#"
[nat]
public_ip = "192.0.2.1"
min_port = 5000
max_port = 6000
inside = { switch = 1, port = 1 }
outside = { switch = 2, port = 2 }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_buffer_and_bad_syntax() {
        assert!(matches!(
            Config::parse("[controller]\noutbound_buffer = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(Config::parse("[controller"), Err(ConfigError::Parse(_))));
    }
}
