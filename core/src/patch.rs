//! The patch/node/connection graph persisted by the editor and consumed by
//! the compiler (daw-compiler::compile).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The temporal granularity at which a signal is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rate {
    Init,
    Control,
    Audio,
    String,
    Ftable,
}

impl Rate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rate::Init => "i",
            Rate::Control => "k",
            Rate::Audio => "a",
            Rate::String => "S",
            Rate::Ftable => "f",
        }
    }
}

/// A heterogeneous node-parameter value. Accepted shapes are dictated by the
/// opcode's port metadata, never inferred from the value alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    String(String),
    Boolean(bool),
}

impl ParamValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            ParamValue::String(_) => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A port on an opcode definition: its id, primary rate, and the set of
/// additional source rates it will accept beyond exact matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub rate: Rate,
    #[serde(default)]
    pub accepted_rates: Vec<Rate>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<ParamValue>,
}

/// A node in a patch: one instantiation of an opcode, with literal
/// parameter values and a UI-only position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub opcode: String,
    #[serde(default)]
    pub params: HashMap<String, ParamValue>,
    #[serde(default)]
    pub position: (f32, f32),
}

/// A directed edge from an output port to an input port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: Uuid,
    pub from_port: String,
    pub to_node: Uuid,
    pub to_port: String,
    /// User-authored fan-in formula, evaluated over the connections that
    /// target the same (to_node, to_port) pair. Absent unless the sink has
    /// more than one inbound connection and the user opted for an explicit
    /// expression instead of the implicit sum.
    #[serde(default)]
    pub formula: Option<String>,
}

/// sr/kr/ksmps/channel/buffer configuration for a compiled engine document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sr: u32,
    pub kr: u32,
    pub channels: u32,
    pub software_buffer: u32,
    pub hardware_buffer: u32,
    #[serde(rename = "zero_dbfs")]
    pub zero_dbfs: f32,
}

impl EngineConfig {
    pub const MIN_SR: u32 = 22_000;
    pub const MAX_SR: u32 = 48_000;
    pub const MIN_KR: u32 = 25;
    pub const MAX_KR: u32 = 48_000;

    /// ksmps = max(1, round(sr/kr)).
    pub fn ksmps(&self) -> u32 {
        ((self.sr as f64 / self.kr as f64).round() as u32).max(1)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(Self::MIN_SR..=Self::MAX_SR).contains(&self.sr) {
            return Err(format!(
                "sample rate {} outside [{}, {}]",
                self.sr,
                Self::MIN_SR,
                Self::MAX_SR
            ));
        }
        if !(Self::MIN_KR..=Self::MAX_KR).contains(&self.kr) {
            return Err(format!(
                "control rate {} outside [{}, {}]",
                self.kr,
                Self::MIN_KR,
                Self::MAX_KR
            ));
        }
        if self.channels == 0 {
            return Err("channel count must be >= 1".to_string());
        }
        if !(32..=8192).contains(&self.software_buffer) {
            return Err("software buffer outside [32, 8192]".to_string());
        }
        if !(32..=8192).contains(&self.hardware_buffer) {
            return Err("hardware buffer outside [32, 8192]".to_string());
        }
        if self.zero_dbfs <= 0.0 {
            return Err("0dBFS reference must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sr: 44_100,
            kr: 4_410,
            channels: 2,
            software_buffer: 512,
            hardware_buffer: 512,
            zero_dbfs: 1.0,
        }
    }
}

/// A persisted audio-graph patch: nodes, connections, and the engine
/// configuration that will back the compiled document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub engine_config: EngineConfig,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Opaque UI-layout blob, round-tripped but never interpreted here.
    #[serde(default)]
    pub ui_layout: serde_json::Value,
}

fn default_schema_version() -> u32 {
    1
}

impl Patch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            schema_version: 1,
            engine_config: EngineConfig::default(),
            nodes: Vec::new(),
            connections: Vec::new(),
            ui_layout: serde_json::Value::Null,
        }
    }

    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ksmps_rounds_to_nearest() {
        let cfg = EngineConfig { sr: 44_100, kr: 4_410, ..EngineConfig::default() };
        assert_eq!(cfg.ksmps(), 10);

        let cfg = EngineConfig { sr: 48_000, kr: 100, ..EngineConfig::default() };
        assert_eq!(cfg.ksmps(), 480);
    }

    #[test]
    fn ksmps_is_never_zero() {
        let cfg = EngineConfig { sr: 22_000, kr: 48_000, ..EngineConfig::default() };
        assert_eq!(cfg.ksmps(), 1);
    }

    #[test]
    fn engine_config_rejects_out_of_range_sr() {
        let cfg = EngineConfig { sr: 10_000, ..EngineConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
