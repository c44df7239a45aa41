pub mod diagnostics;
pub mod event;
pub mod midi;
pub mod patch;
pub mod pattern;
pub mod scale;
pub mod session;

pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use event::{Event, EventKind};
pub use midi::{MidiEvent, MidiNoteEvent};
pub use patch::{Connection, EngineConfig, Node, ParamValue, Patch, Port, Rate};
pub use session::{Assignment, SessionId, SessionState};
