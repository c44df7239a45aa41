//! Per-session lifecycle: compile, start, stop, panic, MIDI binding, and
//! event-bus fanout. One `SessionRuntime` exclusively owns its engine and
//! clock; read-only status queries never contend with in-flight mutations.

use crate::bridge::AudioBridge;
use crate::config::BridgeConfig;
use crate::error::ApiError;
use crate::persistence::PersistenceGateway;
use daw_compiler::{OpcodeRegistry};
use daw_core::diagnostics::{Diagnostic, DiagnosticKind};
use daw_core::event::{Event, EventKind};
use daw_core::midi::MidiEvent;
use daw_core::patch::EngineConfig;
use daw_core::pattern::PatternSnapshot;
use daw_core::session::{Assignment, SessionId, SessionState};
use daw_engine::{EngineOptions, MockEngine, NativeEngine, SequencerClock, SequencerHandle, SynthesisEngine};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

const EVENT_BUS_CAPACITY: usize = 200;
const ENGINE_WARMUP_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_PULL_FRAMES: usize = 256;

struct Merged {
    document: String,
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("    {l}")).collect::<Vec<_>>().join("\n")
}

/// Renames each patch's single `instr 1`/`massign 0, 1`/`i1 0 -1` triple to
/// the assignment's MIDI channel, offsetting GEN table numbers so sibling
/// patches' tables never collide, then concatenates into one document.
fn merge_documents(parts: &[(Assignment, daw_compiler::CompiledProgram)]) -> Merged {
    let header = parts.first().map(|(_, c)| c.header.clone()).unwrap_or_default();
    let mut orc = format!("{header}\n\n");
    let mut massigns = String::new();
    let mut score = String::new();
    let mut table_offset: u32 = 0;

    for (assignment, compiled) in parts {
        let instrument = assignment.midi_channel as u32 + 1;
        orc.push_str(&format!("instr {instrument}\n{}\nendin\n\n", indent(&compiled.orchestra_body)));
        massigns.push_str(&format!("massign {}, {}\n", assignment.midi_channel, instrument));

        for line in compiled.score.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if line.trim() == "i1 0 -1" {
                score.push_str(&format!("i{instrument} 0 -1\n"));
                continue;
            }
            if let Some(rest) = line.strip_prefix('f') {
                if let Some((num_str, tail)) = rest.split_once(' ') {
                    if let Ok(num) = num_str.parse::<u32>() {
                        score.push_str(&format!("f{} {}\n", num + table_offset, tail));
                        continue;
                    }
                }
            }
            score.push_str(line);
            score.push('\n');
        }
        table_offset += 1000;
    }
    orc.push_str(&massigns);
    Merged { document: format!("{orc}\n{}\n{score}\n", daw_compiler::SCORE_SEPARATOR) }
}

type SharedEngine = Arc<std::sync::Mutex<Box<dyn SynthesisEngine>>>;

struct Inner {
    compiled_document: Option<String>,
    engine: Option<SharedEngine>,
    engine_backend: &'static str,
    engine_worker_stop: Option<Arc<AtomicBool>>,
    clock: Option<SequencerHandle>,
    bridge: Option<Arc<AudioBridge>>,
    midi_input: Option<String>,
    pending_pattern: Option<PatternSnapshot>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            compiled_document: None,
            engine: None,
            engine_backend: "none",
            engine_worker_stop: None,
            clock: None,
            bridge: None,
            midi_input: None,
            pending_pattern: None,
        }
    }
}

pub struct SessionRuntime {
    pub id: SessionId,
    pub assignments: Vec<Assignment>,
    state: RwLock<SessionState>,
    inner: AsyncMutex<Inner>,
    events: broadcast::Sender<Event>,
}

impl SessionRuntime {
    pub fn new(assignments: Vec<Assignment>) -> Result<Self, ApiError> {
        let mut seen = HashSet::new();
        for assignment in &assignments {
            if !seen.insert(assignment.midi_channel) {
                return Err(ApiError::Validation(format!("duplicate MIDI channel {}", assignment.midi_channel)));
            }
        }
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Ok(Self { id: SessionId::new(), assignments, state: RwLock::new(SessionState::Idle), inner: AsyncMutex::new(Inner::default()), events })
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().expect("session state lock poisoned")
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().expect("session state lock poisoned") = state;
    }

    fn emit(&self, kind: EventKind) {
        let _ = self.events.send(Event::now(kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub async fn engine_backend(&self) -> &'static str {
        self.inner.lock().await.engine_backend
    }

    pub async fn clock_status(&self) -> Option<daw_engine::ClockStatus> {
        self.inner.lock().await.clock.as_ref().map(|h| h.status.clone())
    }

    pub async fn compile(&self, registry: &OpcodeRegistry, gateway: &PersistenceGateway) -> Result<String, ApiError> {
        let mut compiled_parts = Vec::with_capacity(self.assignments.len());
        let mut all_diagnostics = Vec::new();

        for assignment in &self.assignments {
            let patch = match gateway.get_patch(assignment.patch_id) {
                Ok(patch) => patch,
                Err(error) => {
                    self.emit(EventKind::CompileFailed { diagnostics: vec![] });
                    return Err(error);
                }
            };
            match daw_compiler::compile(&patch, registry) {
                Ok(program) => compiled_parts.push((*assignment, program)),
                Err(diagnostics) => all_diagnostics.extend(diagnostics),
            }
        }

        if !all_diagnostics.is_empty() {
            self.emit(EventKind::CompileFailed { diagnostics: all_diagnostics.clone() });
            return Err(ApiError::Compile(all_diagnostics));
        }

        let merged = merge_documents(&compiled_parts);
        self.inner.lock().await.compiled_document = Some(merged.document.clone());
        self.set_state(SessionState::Compiled);
        self.emit(EventKind::CompileOk);
        Ok(merged.document)
    }

    fn sr_for_session(&self, _gateway: &PersistenceGateway) -> EngineConfig {
        EngineConfig::default()
    }

    pub async fn start(
        &self,
        options: EngineOptions,
        pattern: Option<PatternSnapshot>,
        gateway: &PersistenceGateway,
        bridge_config: &BridgeConfig,
    ) -> Result<(), ApiError> {
        if self.state() == SessionState::Running {
            return Err(ApiError::Conflict("session already running".to_string()));
        }
        let document = {
            let inner = self.inner.lock().await;
            inner.compiled_document.clone().ok_or_else(|| ApiError::Conflict("session has not been compiled".to_string()))?
        };
        let config = self.sr_for_session(gateway);

        let create_and_load = {
            let document = document.clone();
            move || -> Result<(Box<dyn SynthesisEngine>, &'static str), String> {
                match NativeEngine::create(config) {
                    Ok(mut engine) => match engine.load(&document).and_then(|_| engine.start(options)) {
                        Ok(()) => Ok((Box::new(engine), "native")),
                        Err(error) => Err(error.to_string()),
                    },
                    Err(_) => {
                        let mut engine = MockEngine::create(config).map_err(|e| e.to_string())?;
                        engine.load(&document).map_err(|e| e.to_string())?;
                        engine.start(options).map_err(|e| e.to_string())?;
                        Ok((Box::new(engine), "mock"))
                    }
                }
            }
        };

        let result = tokio::time::timeout(ENGINE_WARMUP_TIMEOUT, tokio::task::spawn_blocking(create_and_load))
            .await
            .map_err(|_| ApiError::Runtime("engine warm-up exceeded 2s".to_string()))?
            .map_err(|e| ApiError::Runtime(e.to_string()))?;

        let (engine, backend) = result.map_err(ApiError::Runtime)?;
        let engine: SharedEngine = Arc::new(std::sync::Mutex::new(engine));

        let stop_flag = Arc::new(AtomicBool::new(false));
        {
            let engine = engine.clone();
            let stop_flag = stop_flag.clone();
            let bridge = if options == EngineOptions::Streaming {
                Some(AudioBridge::with_config(config.sr, bridge_config.frame_ms, bridge_config.queue_frames_max, bridge_config.queue_frames_target))
            } else {
                None
            };
            let bridge_for_worker = bridge.clone();
            std::thread::Builder::new()
                .name("engine-worker".to_string())
                .spawn(move || {
                    while !stop_flag.load(Ordering::Acquire) {
                        let block = engine.lock().expect("engine mutex poisoned").pull_audio_block(DEFAULT_PULL_FRAMES);
                        if let Some(bridge) = &bridge_for_worker {
                            bridge.push_block(&block);
                        }
                        if block.is_empty() {
                            std::thread::sleep(Duration::from_millis(2));
                        }
                    }
                })
                .expect("failed to spawn engine worker thread");

            let mut inner = self.inner.lock().await;
            inner.engine = Some(engine.clone());
            inner.engine_backend = backend;
            inner.engine_worker_stop = Some(stop_flag);
            inner.bridge = bridge;
        }

        if let Some(pattern) = pattern {
            let (midi_tx, midi_rx) = crossbeam_channel::unbounded::<MidiEvent>();
            let clock = SequencerClock::spawn(pattern, midi_tx);
            let engine_for_midi = engine.clone();
            std::thread::Builder::new()
                .name("session-midi-relay".to_string())
                .spawn(move || {
                    while let Ok(event) = midi_rx.recv() {
                        engine_for_midi.lock().expect("engine mutex poisoned").push_midi(event);
                    }
                })
                .expect("failed to spawn MIDI relay thread");
            self.inner.lock().await.clock = Some(clock);
        }

        self.set_state(SessionState::Running);
        self.emit(EventKind::EngineStateChanged { state: "running".to_string() });
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ApiError> {
        if self.state() != SessionState::Running {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        if let Some(mut clock) = inner.clock.take() {
            if !clock.stop() {
                tracing::warn!(session_id = %self.id, "sequencer clock watchdog fired during stop");
            }
        }
        if let Some(stop_flag) = inner.engine_worker_stop.take() {
            stop_flag.store(true, Ordering::Release);
        }
        if let Some(engine) = inner.engine.take() {
            let _ = engine.lock().expect("engine mutex poisoned").stop();
        }
        if let Some(bridge) = inner.bridge.take() {
            bridge.detach();
        }
        inner.midi_input = None;
        drop(inner);
        self.set_state(SessionState::Compiled);
        self.emit(EventKind::EngineStateChanged { state: "compiled".to_string() });
        Ok(())
    }

    pub async fn panic(&self) -> Result<(), ApiError> {
        let inner = self.inner.lock().await;
        if let Some(engine) = &inner.engine {
            engine.lock().expect("engine mutex poisoned").panic().map_err(|e| ApiError::Runtime(e.to_string()))?;
        }
        self.emit(EventKind::Error { message: "panic: all channels silenced".to_string() });
        Ok(())
    }

    pub async fn bind_midi_input(&self, name: &str) -> Result<(), ApiError> {
        self.inner.lock().await.midi_input = Some(name.to_string());
        self.emit(EventKind::MidiIn { input_name: name.to_string() });
        Ok(())
    }

    pub async fn send_midi_event(&self, event: MidiEvent) -> Result<(), ApiError> {
        let inner = self.inner.lock().await;
        match &inner.engine {
            Some(engine) => {
                engine.lock().expect("engine mutex poisoned").push_midi(event);
                Ok(())
            }
            None => Err(ApiError::Conflict("session has no running engine".to_string())),
        }
    }

    pub async fn bridge(&self) -> Option<Arc<AudioBridge>> {
        self.inner.lock().await.bridge.clone()
    }

    /// Stores the pattern the next `sequencer/start` call will arm, per the
    /// `PUT .../sequencer/config` endpoint. Does not itself start a clock.
    pub async fn set_pending_pattern(&self, pattern: PatternSnapshot) {
        self.inner.lock().await.pending_pattern = Some(pattern);
    }

    /// Arms the sequencer clock with the most recently configured pattern,
    /// stopping any prior clock first. Requires a running engine to relay
    /// MIDI to.
    pub async fn start_sequencer(&self) -> Result<(), ApiError> {
        if self.state() != SessionState::Running {
            return Err(ApiError::Conflict("sequencer requires a running session".to_string()));
        }
        let mut inner = self.inner.lock().await;
        let engine = inner.engine.clone().ok_or_else(|| ApiError::Conflict("session has no running engine".to_string()))?;
        let pattern = inner.pending_pattern.clone().ok_or_else(|| ApiError::Conflict("sequencer has not been configured".to_string()))?;
        if let Some(mut clock) = inner.clock.take() {
            clock.stop();
        }
        let (midi_tx, midi_rx) = crossbeam_channel::unbounded::<MidiEvent>();
        let clock = SequencerClock::spawn(pattern, midi_tx);
        std::thread::Builder::new()
            .name("session-midi-relay".to_string())
            .spawn(move || {
                while let Ok(event) = midi_rx.recv() {
                    engine.lock().expect("engine mutex poisoned").push_midi(event);
                }
            })
            .expect("failed to spawn MIDI relay thread");
        inner.clock = Some(clock);
        Ok(())
    }

    pub async fn stop_sequencer(&self) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().await;
        if let Some(mut clock) = inner.clock.take() {
            if !clock.stop() {
                tracing::warn!(session_id = %self.id, "sequencer clock watchdog fired on manual stop");
            }
        }
        Ok(())
    }

    pub async fn queue_pad_for_track(&self, track_id: uuid::Uuid, pad: u8) -> Result<(), ApiError> {
        let inner = self.inner.lock().await;
        let clock = inner.clock.as_ref().ok_or_else(|| ApiError::Conflict("sequencer is not running".to_string()))?;
        let index = clock
            .status
            .tracks()
            .iter()
            .position(|t| t.track_id == track_id)
            .ok_or_else(|| ApiError::NotFound(format!("track {track_id} not found")))?;
        clock.queue_pad(index, pad);
        Ok(())
    }
}

pub fn unsupported_opcode_diagnostic(opcode: &str) -> Diagnostic {
    Diagnostic::new(DiagnosticKind::UnknownOpcode, format!("opcode '{opcode}' is not registered"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_midi_channels() {
        let patch_id = uuid::Uuid::new_v4();
        let assignments = vec![
            Assignment { patch_id, midi_channel: 0 },
            Assignment { patch_id, midi_channel: 0 },
        ];
        assert!(SessionRuntime::new(assignments).is_err());
    }

    #[test]
    fn new_session_starts_idle() {
        let session = SessionRuntime::new(vec![]).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }
}
