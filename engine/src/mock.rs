//! Silence backend: used when the native library is unavailable, in tests,
//! and in headless verification. Never touches a real audio device.

use crate::adapter::{AudioBlock, EngineError, EngineMetrics, EngineOptions, SynthesisEngine};
use daw_core::midi::MidiEvent;
use daw_core::patch::EngineConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub struct MockEngine {
    config: EngineConfig,
    running: Arc<AtomicBool>,
    midi_received: Arc<AtomicU64>,
    blocks_performed: u64,
}

impl SynthesisEngine for MockEngine {
    fn create(config: EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            midi_received: Arc::new(AtomicU64::new(0)),
            blocks_performed: 0,
        })
    }

    fn load(&mut self, _document: &str) -> Result<(), EngineError> {
        Ok(())
    }

    fn start(&mut self, _options: EngineOptions) -> Result<(), EngineError> {
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn panic(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn push_midi(&self, _event: MidiEvent) {
        self.midi_received.fetch_add(1, Ordering::Relaxed);
    }

    fn pull_audio_block(&mut self, frames: usize) -> AudioBlock {
        if !self.running.load(Ordering::Relaxed) {
            return Vec::new();
        }
        self.blocks_performed += 1;
        vec![0.0; frames * self.config.channels as usize]
    }

    fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            blocks_performed: self.blocks_performed,
            xruns: 0,
            last_perform_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_silence_once_started() {
        let mut engine = MockEngine::create(EngineConfig::default()).unwrap();
        engine.load("sr = 44100").unwrap();
        engine.start(EngineOptions::Streaming).unwrap();
        let block = engine.pull_audio_block(64);
        assert_eq!(block.len(), 64 * 2);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn produces_nothing_before_start() {
        let mut engine = MockEngine::create(EngineConfig::default()).unwrap();
        assert!(engine.pull_audio_block(64).is_empty());
    }

    #[test]
    fn metrics_track_blocks_performed() {
        let mut engine = MockEngine::create(EngineConfig::default()).unwrap();
        engine.start(EngineOptions::Streaming).unwrap();
        engine.pull_audio_block(64);
        engine.pull_audio_block(64);
        assert_eq!(engine.metrics().blocks_performed, 2);
    }
}
