//! The synthesis engine adapter: the interface every backend satisfies, and
//! the value types that cross it. `NativeEngine` binds the embedded
//! synthesis library; `MockEngine` produces silence for tests and headless
//! verification.

use daw_core::midi::MidiEvent;
use daw_core::patch::EngineConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load synthesis library: {0}")]
    LibraryLoad(String),
    #[error("failed to compile orchestra document: {0}")]
    CompileOrc(String),
    #[error("failed to read score: {0}")]
    ReadScore(String),
    #[error("perform error: {0}")]
    Perform(String),
    #[error("engine is not running")]
    NotRunning,
}

/// Selects whether the engine drives a local audio device or runs headless
/// with audio pulled by the browser bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOptions {
    Local,
    Streaming,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics {
    pub blocks_performed: u64,
    pub xruns: u64,
    pub last_perform_error: bool,
}

/// A stereo interleaved block of samples at the engine's configured sample
/// rate, pulled by the browser bridge in streaming mode.
pub type AudioBlock = Vec<f32>;

pub trait SynthesisEngine: Send {
    fn create(config: EngineConfig) -> Result<Self, EngineError>
    where
        Self: Sized;

    fn load(&mut self, document: &str) -> Result<(), EngineError>;

    fn start(&mut self, options: EngineOptions) -> Result<(), EngineError>;

    fn stop(&mut self) -> Result<(), EngineError>;

    /// Silences every channel without tearing down the running engine.
    fn panic(&mut self) -> Result<(), EngineError>;

    /// Lock-free on the hot path: backends must not block or allocate here.
    fn push_midi(&self, event: MidiEvent);

    /// Only meaningful in streaming mode; returns an empty block when the
    /// engine has no new audio ready.
    fn pull_audio_block(&mut self, frames: usize) -> AudioBlock;

    fn metrics(&self) -> EngineMetrics;
}
