//! Opcode Registry: an immutable catalog of opcode definitions, injected at
//! startup (the catalog's authoring store stays an external collaborator
//! per spec.md §1). `OpcodeRegistry::bundled()` ships a minimal built-in
//! catalog so the compiler can be exercised without one.

use daw_core::patch::{ParamValue, Rate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    pub id: String,
    pub rate: Rate,
    #[serde(default)]
    pub accepted_rates: Vec<Rate>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<ParamValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcodeDef {
    pub name: String,
    pub category: String,
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
    /// Template referencing ports by `{id}` placeholders, e.g.
    /// `"{out} oscili {amp}, {freq}, {ifn}"`.
    pub template: String,
    /// An optional multi-line expansion used instead of `template` when the
    /// opcode needs more than one orchestra line (e.g. a GEN-table helper
    /// that both allocates a function table and reads from it).
    #[serde(default)]
    pub expansion: Option<Vec<String>>,
    /// GEN-table meta-opcodes emit an init-time score line in addition to
    /// their orchestra rendering.
    #[serde(default)]
    pub is_gen_table: bool,
}

pub struct OpcodeRegistry {
    by_name: HashMap<String, OpcodeDef>,
    order: Vec<String>,
}

impl OpcodeRegistry {
    pub fn new(defs: Vec<OpcodeDef>) -> Self {
        let mut by_name = HashMap::new();
        let mut order = Vec::with_capacity(defs.len());
        for def in defs {
            order.push(def.name.clone());
            by_name.insert(def.name.clone(), def);
        }
        Self { by_name, order }
    }

    pub fn list(&self) -> Vec<&OpcodeDef> {
        self.order.iter().filter_map(|n| self.by_name.get(n)).collect()
    }

    pub fn lookup(&self, name: &str) -> Option<&OpcodeDef> {
        self.by_name.get(name)
    }

    pub fn categories(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for def in self.list() {
            if !seen.contains(&def.category) {
                seen.push(def.category.clone());
            }
        }
        seen
    }

    /// A minimal built-in catalog sufficient to compile the scenarios in
    /// spec.md §8: an audio-rate oscillator, a control-rate constant source,
    /// a stereo output sink, and a GEN-table meta-opcode.
    pub fn bundled() -> Self {
        Self::new(vec![
            OpcodeDef {
                name: "oscili".to_string(),
                category: "generator".to_string(),
                inputs: vec![
                    PortDef {
                        id: "amp".to_string(),
                        rate: Rate::Control,
                        accepted_rates: vec![Rate::Init],
                        required: true,
                        default: None,
                    },
                    PortDef {
                        id: "freq".to_string(),
                        rate: Rate::Control,
                        accepted_rates: vec![Rate::Init],
                        required: true,
                        default: None,
                    },
                    PortDef {
                        id: "ifn".to_string(),
                        rate: Rate::Init,
                        accepted_rates: vec![],
                        required: true,
                        default: None,
                    },
                ],
                outputs: vec![PortDef {
                    id: "out".to_string(),
                    rate: Rate::Audio,
                    accepted_rates: vec![],
                    required: false,
                    default: None,
                }],
                template: "{out} oscili {amp}, {freq}, {ifn}".to_string(),
                expansion: None,
                is_gen_table: false,
            },
            OpcodeDef {
                name: "const_i".to_string(),
                category: "source".to_string(),
                inputs: vec![PortDef {
                    id: "value".to_string(),
                    rate: Rate::Init,
                    accepted_rates: vec![],
                    required: true,
                    default: Some(ParamValue::Number(0.0)),
                }],
                outputs: vec![PortDef {
                    id: "out".to_string(),
                    rate: Rate::Init,
                    accepted_rates: vec![],
                    required: false,
                    default: None,
                }],
                template: "{out} = {value}".to_string(),
                expansion: None,
                is_gen_table: false,
            },
            OpcodeDef {
                name: "const_k".to_string(),
                category: "source".to_string(),
                inputs: vec![PortDef {
                    id: "value".to_string(),
                    rate: Rate::Init,
                    accepted_rates: vec![],
                    required: true,
                    default: Some(ParamValue::Number(0.0)),
                }],
                outputs: vec![PortDef {
                    id: "out".to_string(),
                    rate: Rate::Control,
                    accepted_rates: vec![],
                    required: false,
                    default: None,
                }],
                template: "{out} = {value}".to_string(),
                expansion: None,
                is_gen_table: false,
            },
            OpcodeDef {
                name: "const_a".to_string(),
                category: "source".to_string(),
                inputs: vec![PortDef {
                    id: "value".to_string(),
                    rate: Rate::Init,
                    accepted_rates: vec![],
                    required: true,
                    default: Some(ParamValue::Number(0.0)),
                }],
                outputs: vec![PortDef {
                    id: "out".to_string(),
                    rate: Rate::Audio,
                    accepted_rates: vec![],
                    required: false,
                    default: None,
                }],
                template: "{out} = a({value})".to_string(),
                expansion: None,
                is_gen_table: false,
            },
            OpcodeDef {
                name: "outs".to_string(),
                category: "sink".to_string(),
                inputs: vec![
                    PortDef {
                        id: "left".to_string(),
                        rate: Rate::Audio,
                        accepted_rates: vec![],
                        required: true,
                        default: None,
                    },
                    PortDef {
                        id: "right".to_string(),
                        rate: Rate::Audio,
                        accepted_rates: vec![],
                        required: true,
                        default: None,
                    },
                ],
                outputs: vec![],
                template: "outs {left}, {right}".to_string(),
                expansion: None,
                is_gen_table: false,
            },
            OpcodeDef {
                name: "delay".to_string(),
                category: "effect".to_string(),
                inputs: vec![
                    PortDef {
                        id: "ain".to_string(),
                        rate: Rate::Audio,
                        accepted_rates: vec![],
                        required: true,
                        default: None,
                    },
                    PortDef {
                        id: "time".to_string(),
                        rate: Rate::Init,
                        accepted_rates: vec![],
                        required: true,
                        default: Some(ParamValue::Number(0.5)),
                    },
                ],
                outputs: vec![PortDef {
                    id: "out".to_string(),
                    rate: Rate::Audio,
                    accepted_rates: vec![],
                    required: false,
                    default: None,
                }],
                template: "{out} delay {ain}, {time}".to_string(),
                expansion: None,
                is_gen_table: false,
            },
            OpcodeDef {
                name: "gen_table".to_string(),
                category: "table".to_string(),
                inputs: vec![
                    PortDef {
                        id: "table_number".to_string(),
                        rate: Rate::Init,
                        accepted_rates: vec![],
                        required: true,
                        default: None,
                    },
                    PortDef {
                        id: "gen_routine".to_string(),
                        rate: Rate::Init,
                        accepted_rates: vec![],
                        required: true,
                        default: Some(ParamValue::Number(10.0)),
                    },
                    PortDef {
                        id: "size".to_string(),
                        rate: Rate::Init,
                        accepted_rates: vec![],
                        required: true,
                        default: Some(ParamValue::Number(4096.0)),
                    },
                ],
                outputs: vec![PortDef {
                    id: "out".to_string(),
                    rate: Rate::Ftable,
                    accepted_rates: vec![],
                    required: false,
                    default: None,
                }],
                template: "".to_string(),
                expansion: None,
                is_gen_table: true,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_in_bundled_catalog() {
        let registry = OpcodeRegistry::bundled();
        let mut names: Vec<&str> = registry.list().iter().map(|d| d.name.as_str()).collect();
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn lookup_finds_known_opcode() {
        let registry = OpcodeRegistry::bundled();
        assert!(registry.lookup("oscili").is_some());
        assert!(registry.lookup("does-not-exist").is_none());
    }

    #[test]
    fn categories_are_deduplicated() {
        let registry = OpcodeRegistry::bundled();
        let cats = registry.categories();
        let mut sorted = cats.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(cats.len(), sorted.len());
    }
}
