//! Session event bus payloads. The bus itself (a `tokio::sync::broadcast`
//! channel bounded to the most recent 200 events) lives in daw-server, since
//! it is a runtime concern rather than a data-model one; this module only
//! defines what travels over it.

use crate::diagnostics::Diagnostic;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventKind {
    EngineStateChanged { state: String },
    CompileOk,
    CompileFailed { diagnostics: Vec<Diagnostic> },
    SequencerStatus { step: u32, cycle: u32 },
    MidiIn { input_name: String },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn now(kind: EventKind) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self { timestamp_ms, kind }
    }
}
