//! Lock-free snapshot of the sequencer clock's running state, read by the
//! transport API without contending with the clock worker thread. Adapted
//! from the packed-atomic transport idiom, instanced per session rather
//! than held as process-global statics: a process may run several sessions
//! concurrently and each clock owns its own state.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const NO_PAD: u8 = u8::MAX;

pub struct TrackStatus {
    pub track_id: uuid::Uuid,
    active_pad: AtomicU8,
    queued_pad: AtomicU8,
    pad_loop_position: AtomicU32,
    runtime_local_step: AtomicU32,
    enabled: AtomicBool,
}

impl TrackStatus {
    pub fn new(track_id: uuid::Uuid) -> Self {
        Self {
            track_id,
            active_pad: AtomicU8::new(0),
            queued_pad: AtomicU8::new(NO_PAD),
            pad_loop_position: AtomicU32::new(0),
            runtime_local_step: AtomicU32::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn active_pad(&self) -> u8 {
        self.active_pad.load(Ordering::Relaxed)
    }

    pub fn set_active_pad(&self, pad: u8) {
        self.active_pad.store(pad, Ordering::Relaxed);
    }

    pub fn queued_pad(&self) -> Option<u8> {
        match self.queued_pad.load(Ordering::Relaxed) {
            NO_PAD => None,
            pad => Some(pad),
        }
    }

    pub fn set_queued_pad(&self, pad: Option<u8>) {
        self.queued_pad.store(pad.unwrap_or(NO_PAD), Ordering::Relaxed);
    }

    pub fn pad_loop_position(&self) -> u32 {
        self.pad_loop_position.load(Ordering::Relaxed)
    }

    pub fn set_pad_loop_position(&self, position: u32) {
        self.pad_loop_position.store(position, Ordering::Relaxed);
    }

    pub fn runtime_local_step(&self) -> u32 {
        self.runtime_local_step.load(Ordering::Relaxed)
    }

    pub fn set_runtime_local_step(&self, step: u32) {
        self.runtime_local_step.store(step, Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackRuntimeSnapshot {
    pub track_id: uuid::Uuid,
    pub active_pad: u8,
    pub queued_pad: Option<u8>,
    pub pad_loop_position: u32,
    pub runtime_local_step: u32,
    pub enabled: bool,
}

/// Owned by the sequencer clock worker; cloned `Arc`s let the API layer read
/// a consistent-enough snapshot without ever blocking the worker.
#[derive(Clone)]
pub struct ClockStatus {
    step: Arc<AtomicU64>,
    cycle: Arc<AtomicU64>,
    tracks: Arc<Vec<TrackStatus>>,
}

impl ClockStatus {
    pub fn new(track_ids: Vec<uuid::Uuid>) -> Self {
        Self {
            step: Arc::new(AtomicU64::new(0)),
            cycle: Arc::new(AtomicU64::new(0)),
            tracks: Arc::new(track_ids.into_iter().map(TrackStatus::new).collect()),
        }
    }

    pub fn step(&self) -> u64 {
        self.step.load(Ordering::Relaxed)
    }

    pub fn set_step(&self, step: u64) {
        self.step.store(step, Ordering::Relaxed);
    }

    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    pub fn set_cycle(&self, cycle: u64) {
        self.cycle.store(cycle, Ordering::Relaxed);
    }

    pub fn track(&self, index: usize) -> Option<&TrackStatus> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[TrackStatus] {
        &self.tracks
    }

    pub fn snapshot(&self) -> Vec<TrackRuntimeSnapshot> {
        self.tracks
            .iter()
            .map(|t| TrackRuntimeSnapshot {
                track_id: t.track_id,
                active_pad: t.active_pad(),
                queued_pad: t.queued_pad(),
                pad_loop_position: t.pad_loop_position(),
                runtime_local_step: t.runtime_local_step(),
                enabled: t.enabled(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_pad_round_trips_through_sentinel() {
        let status = ClockStatus::new(vec![uuid::Uuid::new_v4()]);
        let track = status.track(0).unwrap();
        assert_eq!(track.queued_pad(), None);
        track.set_queued_pad(Some(3));
        assert_eq!(track.queued_pad(), Some(3));
        track.set_queued_pad(None);
        assert_eq!(track.queued_pad(), None);
    }

    #[test]
    fn snapshot_reflects_concurrent_updates() {
        let status = ClockStatus::new(vec![uuid::Uuid::new_v4(), uuid::Uuid::new_v4()]);
        status.set_step(7);
        status.set_cycle(2);
        status.track(1).unwrap().set_active_pad(5);
        let snap = status.snapshot();
        assert_eq!(status.step(), 7);
        assert_eq!(status.cycle(), 2);
        assert_eq!(snap[1].active_pad, 5);
    }
}
