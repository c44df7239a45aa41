pub mod adapter;
pub mod clock_status;
pub mod mock;
pub mod native;
pub mod sequencer;

pub use adapter::{EngineMetrics, EngineOptions, SynthesisEngine};
pub use clock_status::ClockStatus;
pub use mock::MockEngine;
pub use native::NativeEngine;
pub use sequencer::{SequencerClock, SequencerHandle};
