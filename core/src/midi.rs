//! MIDI event types shared between the sequencer clock, the session
//! runtime's direct-injection API, and the synthesis engine adapter.

use serde::{Deserialize, Serialize};

/// A note-on/note-off event with a sample-accurate offset, the shape the
/// engine adapter's `push_midi` consumes.
#[repr(C)]
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct MidiNoteEvent {
    pub note: u8,
    /// 0 = note off, 1-127 = note on.
    pub velocity: u8,
    pub channel: u8,
    pub sample_offset: u32,
}

/// The user-facing/API shape of a MIDI event, as accepted by
/// `send_midi_event` and produced by platform MIDI input and the sequencer
/// clock before being lowered to `MidiNoteEvent`/CC writes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

impl MidiEvent {
    pub fn channel(&self) -> u8 {
        match self {
            MidiEvent::NoteOn { channel, .. } => *channel,
            MidiEvent::NoteOff { channel, .. } => *channel,
            MidiEvent::ControlChange { channel, .. } => *channel,
        }
    }
}
