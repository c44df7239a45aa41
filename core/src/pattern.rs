//! Pattern data: pads, tracks, drummer tracks, controller sequencers, and
//! the performance document that bundles them with instrument assignments.

use crate::scale::{ChordType, ScaleType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_STEPS: usize = 32;
pub const PADS_PER_TRACK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepCount {
    Sixteen = 16,
    ThirtyTwo = 32,
}

impl Default for StepCount {
    fn default() -> Self {
        StepCount::Sixteen
    }
}

impl StepCount {
    pub fn as_usize(&self) -> usize {
        *self as usize
    }
}

/// One step slot within a pad.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Step {
    pub note: Option<u8>,
    #[serde(default)]
    pub chord: ChordType,
    #[serde(default)]
    pub hold: bool,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
}

fn default_velocity() -> u8 {
    100
}

/// An ordered sequence of step slots plus a step count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pad {
    pub steps: Vec<Step>,
    pub step_count: StepCount,
}

impl Default for Pad {
    fn default() -> Self {
        Self {
            steps: vec![Step::default(); MAX_STEPS],
            step_count: StepCount::default(),
        }
    }
}

impl Pad {
    /// Steps active under the pad's current step_count, ignoring the tail
    /// of the fixed-size backing array.
    pub fn active_steps(&self) -> &[Step] {
        &self.steps[..self.step_count.as_usize().min(self.steps.len())]
    }
}

/// A sequence of pad indices (0..8) applied at successive boundaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PadLoop {
    pub sequence: Vec<u8>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub repeat: bool,
}

impl PadLoop {
    pub const MAX_LEN: usize = 256;
}

/// One of 8 monophonic/chord-aware voices associated with a MIDI channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    pub pads: [Pad; PADS_PER_TRACK],
    pub active_pad: u8,
    pub queued_pad: Option<u8>,
    pub pad_loop: PadLoop,
    #[serde(default)]
    pub scale_root: u8,
    #[serde(default)]
    pub scale_type: ScaleType,
    #[serde(default)]
    pub midi_channel: u8,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "Track".to_string(),
            pads: Default::default(),
            active_pad: 0,
            queued_pad: None,
            pad_loop: PadLoop::default(),
            scale_root: 60,
            scale_type: ScaleType::default(),
            midi_channel: 0,
        }
    }
}

/// A row x step active/velocity cell, for one drum voice lane.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DrumCell {
    pub active: bool,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrummerRow {
    pub pitch: u8,
    pub cells: Vec<DrumCell>,
}

/// 8 pads of row x step active/velocity cells with a row -> pitch mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrummerTrack {
    pub id: Uuid,
    pub name: String,
    pub rows: Vec<DrummerRow>,
    pub pads: [Vec<Vec<DrumCell>>; PADS_PER_TRACK],
    pub active_pad: u8,
    pub queued_pad: Option<u8>,
    #[serde(default)]
    pub midi_channel: u8,
}

/// One keypoint of a piecewise-linear controller curve. `position` lies in
/// [0, 1]; endpoints (0 and 1) are always pinned by the editor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CurveKeypoint {
    pub position: f32,
    pub value: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerCurve {
    pub keypoints: Vec<CurveKeypoint>,
}

impl ControllerCurve {
    /// Samples the piecewise-linear curve at `t` in [0, 1], clamping at the
    /// ends. Returns 0 if there are no keypoints.
    pub fn sample(&self, t: f32) -> u8 {
        let t = t.clamp(0.0, 1.0);
        if self.keypoints.is_empty() {
            return 0;
        }
        if self.keypoints.len() == 1 {
            return self.keypoints[0].value;
        }
        let mut sorted: Vec<CurveKeypoint> = self.keypoints.clone();
        sorted.sort_by(|a, b| a.position.partial_cmp(&b.position).unwrap());

        if t <= sorted[0].position {
            return sorted[0].value;
        }
        if t >= sorted[sorted.len() - 1].position {
            return sorted[sorted.len() - 1].value;
        }
        for w in sorted.windows(2) {
            let (a, b) = (w[0], w[1]);
            if t >= a.position && t <= b.position {
                let span = (b.position - a.position).max(f32::EPSILON);
                let frac = (t - a.position) / span;
                let value = a.value as f32 + frac * (b.value as f32 - a.value as f32);
                return value.round().clamp(0.0, 127.0) as u8;
            }
        }
        sorted[sorted.len() - 1].value
    }
}

/// 8 pads of piecewise-linear curves, one CC target per sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSequencer {
    pub id: Uuid,
    pub name: String,
    pub cc: u8,
    pub midi_channel: u8,
    pub pads: [ControllerCurve; PADS_PER_TRACK],
    pub active_pad: u8,
    pub queued_pad: Option<u8>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSnapshot {
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub drummer_tracks: Vec<DrummerTrack>,
    #[serde(default)]
    pub controller_sequencers: Vec<ControllerSequencer>,
    pub bpm: f32,
}

/// A named bundle of instrument-to-MIDI-channel assignments plus the
/// pattern snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Performance {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub pattern: PatternSnapshot,
}

fn default_schema_version() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_constant_value_emits_no_interpolation_drift() {
        let curve = ControllerCurve {
            keypoints: vec![
                CurveKeypoint { position: 0.0, value: 64 },
                CurveKeypoint { position: 1.0, value: 64 },
            ],
        };
        for i in 0..=10 {
            assert_eq!(curve.sample(i as f32 / 10.0), 64);
        }
    }

    #[test]
    fn curve_ramps_monotonically() {
        let curve = ControllerCurve {
            keypoints: vec![
                CurveKeypoint { position: 0.0, value: 0 },
                CurveKeypoint { position: 1.0, value: 127 },
            ],
        };
        let mut prev = 0;
        for i in 0..=16 {
            let v = curve.sample(i as f32 / 16.0);
            assert!(v >= prev);
            prev = v;
        }
        assert_eq!(curve.sample(1.0), 127);
    }

    #[test]
    fn pad_default_has_sixteen_active_steps() {
        let pad = Pad::default();
        assert_eq!(pad.active_steps().len(), 16);
    }
}
