//! Platform MIDI input enumeration and binding. Discovery only; the core
//! does not implement MIDI discovery beyond listing what the platform
//! reports.

use midir::{MidiInput, MidiInputPort};

pub fn list_input_names() -> Vec<String> {
    let Ok(midi_in) = MidiInput::new("daw-server-probe") else {
        return Vec::new();
    };
    midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect()
}

pub fn find_port_by_name(midi_in: &MidiInput, name: &str) -> Option<MidiInputPort> {
    midi_in.ports().into_iter().find(|port| midi_in.port_name(port).map(|n| n == name).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_input_names_does_not_panic_without_a_midi_subsystem() {
        let _ = list_input_names();
    }
}
