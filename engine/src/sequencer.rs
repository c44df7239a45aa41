//! The sequencer clock: a dedicated worker thread per session, driven by a
//! monotonic high-resolution time source, that turns pad/controller pattern
//! state into timed MIDI events.

use crate::clock_status::ClockStatus;
use daw_core::midi::MidiEvent;
use daw_core::pattern::{ControllerSequencer, DrumCell, DrummerTrack, PadLoop, PatternSnapshot, Track};
use daw_core::scale::{self, ChordType};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const OVERSAMPLE_PER_STEP: u32 = 8;
const MIN_GATE_MS: f64 = 10.0;
const DEFAULT_GATE_RATIO: f64 = 0.8;
const STOP_WATCHDOG: Duration = Duration::from_millis(500);

pub fn step_duration(bpm: f32) -> Duration {
    let ms = 60_000.0 / (bpm as f64) / 4.0;
    Duration::from_secs_f64((ms / 1000.0).max(0.001))
}

fn gate_duration(step: Duration) -> Duration {
    let ms = (step.as_secs_f64() * 1000.0 * DEFAULT_GATE_RATIO).max(MIN_GATE_MS);
    Duration::from_secs_f64(ms / 1000.0)
}

/// Expands a triggered note into the notes of its chord, quantized to the
/// track's scale first. `ChordType::None` carries no intervals, so the
/// quantized root is the only note produced.
fn chord_notes(note: u8, chord: ChordType, scale_root: u8, scale_type: daw_core::scale::ScaleType) -> Vec<u8> {
    let root = scale::quantize(note, scale_root, scale_type);
    let intervals = chord.get_intervals();
    if intervals.is_empty() {
        return vec![root];
    }
    intervals
        .iter()
        .filter_map(|&iv| {
            let n = root as u16 + iv as u16;
            (n <= 127).then_some(n as u8)
        })
        .collect()
}

/// Notes currently rung by a `hold` step, released only once a new trigger
/// or track boundary supersedes them.
#[derive(Debug, Clone)]
struct SustainedNotes {
    channel: u8,
    notes: Vec<u8>,
}

struct TrackRuntime {
    #[allow(dead_code)]
    id: Uuid,
    channel: u8,
    pads: [daw_core::pattern::Pad; 8],
    active_pad: u8,
    queued_pad: Option<u8>,
    pad_loop: PadLoop,
    pad_loop_position: u32,
    scale_root: u8,
    scale_type: daw_core::scale::ScaleType,
    enabled: bool,
    local_step: u32,
    sustain: Option<SustainedNotes>,
}

impl From<&Track> for TrackRuntime {
    fn from(t: &Track) -> Self {
        Self {
            id: t.id,
            channel: t.midi_channel,
            pads: t.pads.clone(),
            active_pad: t.active_pad,
            queued_pad: t.queued_pad,
            pad_loop: t.pad_loop.clone(),
            pad_loop_position: 0,
            scale_root: t.scale_root,
            scale_type: t.scale_type,
            enabled: true,
            local_step: 0,
            sustain: None,
        }
    }
}

/// Applies one boundary tick to a track's pad-loop state machine. Pure and
/// side-effect free so it can be exercised without a live worker thread.
///
/// Any note held open by a `hold` step does not survive a pad boundary; the
/// caller is responsible for flushing `track.sustain` to a note-off before
/// the new pad's first step dispatches.
fn apply_boundary(track: &mut TrackRuntime) {
    if let Some(queued) = track.queued_pad.take() {
        track.active_pad = queued;
        if track.pad_loop.enabled && !track.pad_loop.sequence.is_empty() {
            // An explicit queue overrides exactly one boundary; the loop
            // resumes from position + 1 on the following boundary.
            track.pad_loop_position = track.pad_loop_position.wrapping_add(1);
        }
        return;
    }
    if !track.pad_loop.enabled || track.pad_loop.sequence.is_empty() {
        return;
    }
    let next_position = track.pad_loop_position + 1;
    if next_position as usize >= track.pad_loop.sequence.len() {
        if track.pad_loop.repeat {
            track.pad_loop_position = 0;
        } else {
            track.pad_loop.enabled = false;
        }
    } else {
        track.pad_loop_position = next_position;
    }
    let index = (track.pad_loop_position as usize).min(track.pad_loop.sequence.len() - 1);
    track.active_pad = track.pad_loop.sequence[index];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingNoteOff {
    at_nanos: u128,
    channel: u8,
    note: u8,
}

impl PartialOrd for PendingNoteOff {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingNoteOff {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at_nanos.cmp(&other.at_nanos)
    }
}

struct ControllerRuntime {
    cc: u8,
    channel: u8,
    curves: [daw_core::pattern::ControllerCurve; 8],
    active_pad: u8,
    queued_pad: Option<u8>,
    enabled: bool,
    last_emitted: Option<u8>,
}

impl From<&ControllerSequencer> for ControllerRuntime {
    fn from(c: &ControllerSequencer) -> Self {
        Self {
            cc: c.cc,
            channel: c.midi_channel,
            curves: c.pads.clone(),
            active_pad: c.active_pad,
            queued_pad: c.queued_pad,
            enabled: c.enabled,
            last_emitted: None,
        }
    }
}

/// Promotes a controller's queued pad to active at a cycle boundary. Mirrors
/// `apply_boundary`'s queue-take for tracks; controllers have no pad-loop
/// sequence, so there is nothing else to advance.
fn apply_controller_boundary(controller: &mut ControllerRuntime) {
    if let Some(queued) = controller.queued_pad.take() {
        controller.active_pad = queued;
    }
}

struct DrummerRuntime {
    #[allow(dead_code)]
    id: Uuid,
    channel: u8,
    row_pitches: Vec<u8>,
    pads: [Vec<Vec<DrumCell>>; 8],
    active_pad: u8,
    queued_pad: Option<u8>,
    local_step: u32,
}

impl From<&DrummerTrack> for DrummerRuntime {
    fn from(d: &DrummerTrack) -> Self {
        Self {
            id: d.id,
            channel: d.midi_channel,
            row_pitches: d.rows.iter().map(|r| r.pitch).collect(),
            pads: d.pads.clone(),
            active_pad: d.active_pad,
            queued_pad: d.queued_pad,
            local_step: 0,
        }
    }
}

impl DrummerRuntime {
    /// Step count of the active pad, taken from the longest row (rows are
    /// expected to share a length, but dispatch tolerates ragged ones).
    fn step_count(&self) -> usize {
        self.pads[self.active_pad as usize].iter().map(|row| row.len()).max().unwrap_or(0).max(1)
    }
}

/// Mirrors `apply_boundary`'s queue-take; drummer tracks have no pad-loop
/// sequence to advance.
fn apply_drummer_boundary(drummer: &mut DrummerRuntime) {
    if let Some(queued) = drummer.queued_pad.take() {
        drummer.active_pad = queued;
    }
}

pub enum ClockCommand {
    QueuePad { track_index: usize, pad: u8 },
    SetTrackEnabled { track_index: usize, enabled: bool },
    Stop,
}

pub struct SequencerHandle {
    commands: crossbeam_channel::Sender<ClockCommand>,
    pub status: ClockStatus,
    stopped: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl SequencerHandle {
    pub fn queue_pad(&self, track_index: usize, pad: u8) {
        let _ = self.commands.send(ClockCommand::QueuePad { track_index, pad });
    }

    pub fn set_track_enabled(&self, track_index: usize, enabled: bool) {
        let _ = self.commands.send(ClockCommand::SetTrackEnabled { track_index, enabled });
    }

    /// Stops the worker, flushing outstanding note-offs, and blocks until it
    /// exits or the watchdog fires. Returns `false` if the watchdog fired,
    /// in which case the caller must ask the engine to silence all channels.
    pub fn stop(&mut self) -> bool {
        let _ = self.commands.send(ClockCommand::Stop);
        let deadline = Instant::now() + STOP_WATCHDOG;
        while Instant::now() < deadline {
            if self.stopped.load(Ordering::Acquire) {
                if let Some(join) = self.join.take() {
                    let _ = join.join();
                }
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }
}

pub struct SequencerClock;

impl SequencerClock {
    /// Spawns the worker thread and returns a handle for control and status
    /// reads. `midi_tx` receives every emitted event in monotonic-timestamp
    /// order relative to other events from the same clock.
    pub fn spawn(pattern: PatternSnapshot, midi_tx: crossbeam_channel::Sender<MidiEvent>) -> SequencerHandle {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let track_ids: Vec<Uuid> = pattern.tracks.iter().map(|t| t.id).collect();
        let status = ClockStatus::new(track_ids);
        let status_for_worker = status.clone();
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_for_worker = stopped.clone();

        let join = std::thread::Builder::new()
            .name("sequencer-clock".to_string())
            .spawn(move || run_worker(pattern, midi_tx, command_rx, status_for_worker, stopped_for_worker))
            .expect("failed to spawn sequencer clock thread");

        SequencerHandle { commands: command_tx, status, stopped, join: Some(join) }
    }
}

fn run_worker(
    pattern: PatternSnapshot,
    midi_tx: crossbeam_channel::Sender<MidiEvent>,
    command_rx: crossbeam_channel::Receiver<ClockCommand>,
    status: ClockStatus,
    stopped: Arc<AtomicBool>,
) {
    let mut tracks: Vec<TrackRuntime> = pattern.tracks.iter().map(TrackRuntime::from).collect();
    let mut drummers: Vec<DrummerRuntime> = pattern.drummer_tracks.iter().map(DrummerRuntime::from).collect();
    let mut controllers: Vec<ControllerRuntime> = pattern.controller_sequencers.iter().map(ControllerRuntime::from).collect();
    let step = step_duration(pattern.bpm.max(1.0));
    let mut note_offs: BinaryHeap<Reverse<PendingNoteOff>> = BinaryHeap::new();

    let start = Instant::now();
    let mut nominal_step_start = start;
    let mut global_step: u64 = 0;
    let mut global_cycle: u64 = 0;
    let global_step_count = tracks
        .iter()
        .map(|t| t.pads[t.active_pad as usize].step_count.as_usize())
        .chain(drummers.iter().map(|d| d.step_count()))
        .max()
        .unwrap_or(16);

    loop {
        for command in command_rx.try_iter() {
            match command {
                ClockCommand::QueuePad { track_index, pad } => {
                    if let Some(t) = tracks.get_mut(track_index) {
                        t.queued_pad = Some(pad);
                    }
                }
                ClockCommand::SetTrackEnabled { track_index, enabled } => {
                    if let Some(t) = tracks.get_mut(track_index) {
                        t.enabled = enabled;
                    }
                }
                ClockCommand::Stop => {
                    flush_note_offs(&mut note_offs, &midi_tx, u128::MAX);
                    for track in tracks.iter_mut() {
                        if let Some(sustain) = track.sustain.take() {
                            for note in sustain.notes {
                                let _ = midi_tx.send(MidiEvent::NoteOff { channel: sustain.channel, note });
                            }
                        }
                    }
                    stopped.store(true, Ordering::Release);
                    return;
                }
            }
        }

        wait_until(nominal_step_start);

        // 1. Boundary actions, in track insertion order. A pad change flushes
        // any note a `hold` step left ringing on that track.
        let step_start_nanos = nominal_step_start.duration_since(start).as_nanos();
        for track in tracks.iter_mut() {
            if track.local_step == 0 {
                apply_boundary(track);
                if let Some(sustain) = track.sustain.take() {
                    for note in sustain.notes {
                        let _ = midi_tx.send(MidiEvent::NoteOff { channel: sustain.channel, note });
                    }
                }
            }
        }
        for drummer in drummers.iter_mut() {
            if drummer.local_step == 0 {
                apply_drummer_boundary(drummer);
            }
        }
        if global_step == 0 {
            for controller in controllers.iter_mut() {
                apply_controller_boundary(controller);
            }
        }

        // 2. Dispatch.
        for track in tracks.iter_mut() {
            if !track.enabled {
                continue;
            }
            let pad = &track.pads[track.active_pad as usize];
            let local = track.local_step as usize % pad.step_count.as_usize().max(1);
            let Some(slot) = pad.active_steps().get(local).copied() else { continue };
            if let Some(note) = slot.note {
                let notes = chord_notes(note, slot.chord, track.scale_root, track.scale_type);
                if let Some(previous) = track.sustain.take() {
                    for n in previous.notes {
                        let _ = midi_tx.send(MidiEvent::NoteOff { channel: previous.channel, note: n });
                    }
                }
                for &n in &notes {
                    let _ = midi_tx.send(MidiEvent::NoteOn { channel: track.channel, note: n, velocity: slot.velocity });
                }
                if slot.hold {
                    // Sustain: skip the gate-ratio note-off: the note rings
                    // until a new trigger, a rest-free retrigger, or a pad
                    // boundary supersedes it.
                    track.sustain = Some(SustainedNotes { channel: track.channel, notes });
                } else {
                    let gate = gate_duration(step);
                    for n in notes {
                        note_offs.push(Reverse(PendingNoteOff {
                            at_nanos: step_start_nanos + gate.as_nanos(),
                            channel: track.channel,
                            note: n,
                        }));
                    }
                }
            }
        }
        for drummer in drummers.iter() {
            let active_pad = &drummer.pads[drummer.active_pad as usize];
            let count = drummer.step_count();
            let local = drummer.local_step as usize % count;
            for (row_index, pitch) in drummer.row_pitches.iter().enumerate() {
                let Some(row) = active_pad.get(row_index) else { continue };
                let Some(cell) = row.get(local) else { continue };
                if !cell.active {
                    continue;
                }
                let _ = midi_tx.send(MidiEvent::NoteOn { channel: drummer.channel, note: *pitch, velocity: cell.velocity });
                let gate = gate_duration(step);
                note_offs.push(Reverse(PendingNoteOff {
                    at_nanos: step_start_nanos + gate.as_nanos(),
                    channel: drummer.channel,
                    note: *pitch,
                }));
            }
        }

        // 3. Note-offs due by the next step boundary.
        let next_start_nanos = step_start_nanos + step.as_nanos();
        flush_note_offs(&mut note_offs, &midi_tx, next_start_nanos);

        // 4. Controller curves, oversampled within the step.
        for controller in controllers.iter_mut() {
            if !controller.enabled {
                continue;
            }
            let curve = &controller.curves[controller.active_pad as usize];
            for i in 0..OVERSAMPLE_PER_STEP {
                let t = (global_step as f32 + i as f32 / OVERSAMPLE_PER_STEP as f32) / global_step_count.max(1) as f32;
                let value = curve.sample(t.fract());
                if controller.last_emitted != Some(value) {
                    let _ = midi_tx.send(MidiEvent::ControlChange {
                        channel: controller.channel,
                        controller: controller.cc,
                        value,
                    });
                    controller.last_emitted = Some(value);
                }
            }
        }

        // 5. Advance, with drift correction that only ever skips forward.
        for track in tracks.iter_mut() {
            let count = track.pads[track.active_pad as usize].step_count.as_usize().max(1) as u32;
            track.local_step = (track.local_step + 1) % count;
        }
        for drummer in drummers.iter_mut() {
            let count = drummer.step_count() as u32;
            drummer.local_step = (drummer.local_step + 1) % count;
        }
        global_step += 1;
        if global_step as usize >= global_step_count {
            global_step = 0;
            global_cycle += 1;
        }

        let mut next_nominal = nominal_step_start + step;
        let now = Instant::now();
        if now.saturating_duration_since(next_nominal) > step {
            next_nominal = now;
        }
        nominal_step_start = next_nominal;

        status.set_step(global_step);
        status.set_cycle(global_cycle);
        for (index, track) in tracks.iter().enumerate() {
            if let Some(ts) = status.track(index) {
                ts.set_active_pad(track.active_pad);
                ts.set_queued_pad(track.queued_pad);
                ts.set_pad_loop_position(track.pad_loop_position);
                ts.set_runtime_local_step(track.local_step);
                ts.set_enabled(track.enabled);
            }
        }
    }
}

fn flush_note_offs(heap: &mut BinaryHeap<Reverse<PendingNoteOff>>, midi_tx: &crossbeam_channel::Sender<MidiEvent>, up_to_nanos: u128) {
    while let Some(Reverse(pending)) = heap.peek() {
        if pending.at_nanos > up_to_nanos {
            break;
        }
        let pending = heap.pop().unwrap().0;
        let _ = midi_tx.send(MidiEvent::NoteOff { channel: pending.channel, note: pending.note });
    }
}

fn wait_until(target: Instant) {
    loop {
        let now = Instant::now();
        if now >= target {
            return;
        }
        let remaining = target - now;
        std::thread::sleep(remaining.min(Duration::from_millis(5)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_with_pad_loop(sequence: Vec<u8>, repeat: bool) -> TrackRuntime {
        TrackRuntime {
            id: Uuid::new_v4(),
            channel: 0,
            pads: Default::default(),
            active_pad: 0,
            queued_pad: None,
            pad_loop: PadLoop { sequence, enabled: true, repeat },
            pad_loop_position: 0,
            scale_root: 60,
            scale_type: daw_core::scale::ScaleType::Chromatic,
            enabled: true,
            local_step: 0,
            sustain: None,
        }
    }

    #[test]
    fn pad_loop_freezes_after_four_boundaries_when_repeat_is_false() {
        let mut track = track_with_pad_loop(vec![0, 0, 0, 0], false);
        for _ in 0..4 {
            apply_boundary(&mut track);
        }
        assert!(!track.pad_loop.enabled);
        assert_eq!(track.active_pad, 0);
    }

    #[test]
    fn pad_loop_wraps_when_repeat_is_true() {
        let mut track = track_with_pad_loop(vec![0, 1, 2], true);
        for _ in 0..3 {
            apply_boundary(&mut track);
        }
        assert!(track.pad_loop.enabled);
        assert_eq!(track.active_pad, 0);
    }

    #[test]
    fn explicit_queue_overrides_exactly_one_boundary() {
        let mut track = track_with_pad_loop(vec![0, 1, 2], true);
        apply_boundary(&mut track);
        assert_eq!(track.active_pad, 1);
        track.queued_pad = Some(7);
        apply_boundary(&mut track);
        assert_eq!(track.active_pad, 7);
        apply_boundary(&mut track);
        assert_eq!(track.active_pad, 0);
    }

    #[test]
    fn gate_duration_respects_minimum() {
        let step = Duration::from_millis(1);
        let gate = gate_duration(step);
        assert!(gate.as_secs_f64() * 1000.0 >= MIN_GATE_MS);
    }

    #[test]
    fn step_duration_matches_bpm_formula() {
        let d = step_duration(120.0);
        assert!((d.as_secs_f64() * 1000.0 - 125.0).abs() < 0.01);
    }

    #[test]
    fn flush_note_offs_emits_only_due_events() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(PendingNoteOff { at_nanos: 100, channel: 0, note: 60 }));
        heap.push(Reverse(PendingNoteOff { at_nanos: 300, channel: 0, note: 61 }));
        flush_note_offs(&mut heap, &tx, 200);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn controller_curve_dedup_skips_unchanged_samples() {
        let mut last = None;
        let mut emitted = 0;
        for v in [0u8, 0, 0, 64, 64, 127] {
            if last != Some(v) {
                emitted += 1;
                last = Some(v);
            }
        }
        assert_eq!(emitted, 3);
    }

    #[test]
    fn chord_none_yields_only_the_quantized_root() {
        let notes = chord_notes(60, ChordType::None, 60, daw_core::scale::ScaleType::Chromatic);
        assert_eq!(notes, vec![60]);
    }

    #[test]
    fn chord_major_expands_to_root_third_and_fifth() {
        let notes = chord_notes(60, ChordType::Major, 60, daw_core::scale::ScaleType::Chromatic);
        assert_eq!(notes, vec![60, 64, 67]);
    }

    #[test]
    fn chord_notes_above_127_are_dropped_rather_than_wrapped() {
        let notes = chord_notes(125, ChordType::Major, 60, daw_core::scale::ScaleType::Chromatic);
        assert_eq!(notes, vec![125]);
    }

    #[test]
    fn chord_root_is_quantized_to_the_track_scale_first() {
        // 61 is outside C major; quantize() should snap it before the chord
        // interval is added, not leave an out-of-scale root in place.
        let notes = chord_notes(61, ChordType::None, 60, daw_core::scale::ScaleType::Major);
        assert_eq!(notes, vec![scale::quantize(61, 60, daw_core::scale::ScaleType::Major)]);
    }

    #[test]
    fn controller_boundary_promotes_queued_pad() {
        let mut controller = ControllerRuntime {
            cc: 1,
            channel: 0,
            curves: Default::default(),
            active_pad: 0,
            queued_pad: Some(3),
            enabled: true,
            last_emitted: None,
        };
        apply_controller_boundary(&mut controller);
        assert_eq!(controller.active_pad, 3);
        assert_eq!(controller.queued_pad, None);
    }

    #[test]
    fn controller_boundary_is_a_no_op_without_a_queued_pad() {
        let mut controller = ControllerRuntime {
            cc: 1,
            channel: 0,
            curves: Default::default(),
            active_pad: 2,
            queued_pad: None,
            enabled: true,
            last_emitted: None,
        };
        apply_controller_boundary(&mut controller);
        assert_eq!(controller.active_pad, 2);
    }

    fn drummer_with_one_active_cell() -> DrummerRuntime {
        let mut pads: [Vec<Vec<DrumCell>>; 8] = Default::default();
        pads[0] = vec![vec![
            DrumCell { active: true, velocity: 100 },
            DrumCell { active: false, velocity: 100 },
        ]];
        DrummerRuntime {
            id: Uuid::new_v4(),
            channel: 9,
            row_pitches: vec![36],
            pads,
            active_pad: 0,
            queued_pad: Some(1),
            local_step: 0,
        }
    }

    #[test]
    fn drummer_step_count_follows_the_longest_row_in_the_active_pad() {
        let drummer = drummer_with_one_active_cell();
        assert_eq!(drummer.step_count(), 2);
    }

    #[test]
    fn drummer_boundary_promotes_queued_pad() {
        let mut drummer = drummer_with_one_active_cell();
        apply_drummer_boundary(&mut drummer);
        assert_eq!(drummer.active_pad, 1);
        assert_eq!(drummer.queued_pad, None);
    }
}
