//! Request/response schemas and dispatch for every endpoint in the
//! transport surface: patch/performance/app-state CRUD, session lifecycle,
//! sequencer transport, direct MIDI injection, and WebRTC negotiation.

use crate::config::BridgeConfig;
use crate::error::ApiError;
use crate::midi_input;
use crate::persistence::PersistenceGateway;
use crate::session_runtime::SessionRuntime;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use daw_compiler::OpcodeRegistry;
use daw_core::midi::MidiEvent;
use daw_core::patch::Patch;
use daw_core::pattern::{Performance, PatternSnapshot};
use daw_core::session::{Assignment, SessionId};
use daw_engine::EngineOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use uuid::Uuid;

pub struct AppState {
    pub registry: Arc<OpcodeRegistry>,
    pub gateway: Arc<PersistenceGateway>,
    pub bridge_config: BridgeConfig,
    pub sessions: AsyncRwLock<HashMap<Uuid, Arc<SessionRuntime>>>,
}

impl AppState {
    pub fn new(registry: Arc<OpcodeRegistry>, gateway: Arc<PersistenceGateway>, bridge_config: BridgeConfig) -> Arc<Self> {
        Arc::new(Self { registry, gateway, bridge_config, sessions: AsyncRwLock::new(HashMap::new()) })
    }

    async fn session(&self, id: Uuid) -> Result<Arc<SessionRuntime>, ApiError> {
        self.sessions.read().await.get(&id).cloned().ok_or_else(|| ApiError::NotFound(format!("session {id} not found")))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/health/realtime", get(health_realtime))
        .route("/api/opcodes", get(list_opcodes))
        .route("/api/patches", get(list_patches).post(create_patch))
        .route("/api/patches/{id}", get(get_patch).put(put_patch).delete(delete_patch))
        .route("/api/performances", get(list_performances).post(create_performance))
        .route("/api/performances/{id}", get(get_performance).put(put_performance).delete(delete_performance))
        .route("/api/app-state", get(get_app_state).put(put_app_state))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}/compile", post(compile_session))
        .route("/api/sessions/{id}/start", post(start_session))
        .route("/api/sessions/{id}/stop", post(stop_session))
        .route("/api/sessions/{id}/panic", post(panic_session))
        .route("/api/sessions/{id}/sequencer/config", put(put_sequencer_config))
        .route("/api/sessions/{id}/sequencer/start", post(start_sequencer))
        .route("/api/sessions/{id}/sequencer/stop", post(stop_sequencer))
        .route("/api/sessions/{id}/sequencer/status", get(sequencer_status))
        .route("/api/sessions/{id}/sequencer/tracks/{track_id}/queue-pad", post(queue_pad))
        .route("/api/sessions/{id}/midi-event", post(send_midi_event))
        .route("/api/sessions/{id}/audio/webrtc", post(webrtc_negotiate))
        .route("/api/midi/inputs", get(list_midi_inputs))
        .route("/api/sessions/{id}/midi-input", post(bind_midi_input))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

#[derive(Serialize)]
struct RealtimeHealthBody {
    engine_backend: &'static str,
    sessions_running: usize,
}

async fn health_realtime(State(state): State<Arc<AppState>>) -> Json<RealtimeHealthBody> {
    let sessions = state.sessions.read().await;
    let mut backend = "none";
    let mut running = 0usize;
    for session in sessions.values() {
        if session.state() == daw_core::session::SessionState::Running {
            running += 1;
            backend = session.engine_backend().await;
        }
    }
    Json(RealtimeHealthBody { engine_backend: backend, sessions_running: running })
}

async fn list_opcodes(State(state): State<Arc<AppState>>) -> Json<Vec<daw_compiler::OpcodeDef>> {
    Json(state.registry.list().into_iter().cloned().collect())
}

async fn list_patches(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Patch>>, ApiError> {
    Ok(Json(state.gateway.list_patches()?))
}

async fn create_patch(State(state): State<Arc<AppState>>, Json(patch): Json<Patch>) -> Result<Json<Patch>, ApiError> {
    state.gateway.put_patch(&patch)?;
    Ok(Json(patch))
}

async fn get_patch(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Patch>, ApiError> {
    Ok(Json(state.gateway.get_patch(id)?))
}

async fn put_patch(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(mut patch): Json<Patch>) -> Result<Json<Patch>, ApiError> {
    patch.id = id;
    state.gateway.put_patch(&patch)?;
    Ok(Json(patch))
}

async fn delete_patch(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.gateway.delete_patch(id)
}

async fn list_performances(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Performance>>, ApiError> {
    Ok(Json(state.gateway.list_performances()?))
}

async fn create_performance(State(state): State<Arc<AppState>>, Json(performance): Json<Performance>) -> Result<Json<Performance>, ApiError> {
    state.gateway.put_performance(&performance)?;
    Ok(Json(performance))
}

async fn get_performance(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Performance>, ApiError> {
    Ok(Json(state.gateway.get_performance(id)?))
}

async fn put_performance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(mut performance): Json<Performance>,
) -> Result<Json<Performance>, ApiError> {
    performance.id = id;
    state.gateway.put_performance(&performance)?;
    Ok(Json(performance))
}

async fn delete_performance(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.gateway.delete_performance(id)
}

async fn get_app_state(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.gateway.get_app_state()?.unwrap_or(Value::Null)))
}

async fn put_app_state(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> impl IntoResponse {
    state.gateway.put_app_state_debounced(body).await;
    axum::http::StatusCode::ACCEPTED
}

#[derive(Deserialize)]
struct CreateSessionBody {
    assignments: Vec<Assignment>,
}

#[derive(Serialize)]
struct SessionBody {
    id: SessionId,
    state: daw_core::session::SessionState,
}

async fn create_session(State(state): State<Arc<AppState>>, Json(body): Json<CreateSessionBody>) -> Result<Json<SessionBody>, ApiError> {
    let runtime = Arc::new(SessionRuntime::new(body.assignments)?);
    let id = runtime.id;
    state.sessions.write().await.insert(id.0, runtime.clone());
    Ok(Json(SessionBody { id, state: runtime.state() }))
}

#[derive(Serialize)]
struct CompileBody {
    document: String,
}

async fn compile_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<CompileBody>, ApiError> {
    let session = state.session(id).await?;
    let document = session.compile(&state.registry, &state.gateway).await?;
    Ok(Json(CompileBody { document }))
}

#[derive(Deserialize, Default)]
struct StartSessionBody {
    #[serde(default)]
    streaming: bool,
    #[serde(default)]
    pattern: Option<PatternSnapshot>,
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<StartSessionBody>>,
) -> Result<Json<SessionBody>, ApiError> {
    let session = state.session(id).await?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let options = if body.streaming { EngineOptions::Streaming } else { EngineOptions::Local };
    session.start(options, body.pattern, &state.gateway, &state.bridge_config).await?;
    Ok(Json(SessionBody { id: session.id, state: session.state() }))
}

async fn stop_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<SessionBody>, ApiError> {
    let session = state.session(id).await?;
    session.stop().await?;
    Ok(Json(SessionBody { id: session.id, state: session.state() }))
}

async fn panic_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    let session = state.session(id).await?;
    session.panic().await
}

async fn put_sequencer_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(pattern): Json<PatternSnapshot>,
) -> Result<(), ApiError> {
    let session = state.session(id).await?;
    session.set_pending_pattern(pattern).await;
    Ok(())
}

async fn start_sequencer(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    let session = state.session(id).await?;
    session.start_sequencer().await
}

async fn stop_sequencer(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    let session = state.session(id).await?;
    session.stop_sequencer().await
}

#[derive(Serialize)]
struct SequencerStatusBody {
    step: u64,
    cycle: u64,
    tracks: Vec<daw_engine::clock_status::TrackRuntimeSnapshot>,
}

async fn sequencer_status(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<SequencerStatusBody>, ApiError> {
    let session = state.session(id).await?;
    let status = session.clock_status().await.ok_or_else(|| ApiError::Conflict("sequencer is not running".to_string()))?;
    Ok(Json(SequencerStatusBody { step: status.step(), cycle: status.cycle(), tracks: status.snapshot() }))
}

#[derive(Deserialize)]
struct QueuePadBody {
    pad_index: u8,
}

async fn queue_pad(
    State(state): State<Arc<AppState>>,
    Path((id, track_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<QueuePadBody>,
) -> Result<(), ApiError> {
    let session = state.session(id).await?;
    session.queue_pad_for_track(track_id, body.pad_index).await
}

async fn send_midi_event(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(event): Json<MidiEvent>) -> Result<(), ApiError> {
    let session = state.session(id).await?;
    session.send_midi_event(event).await
}

#[derive(Deserialize)]
struct WebRtcOfferBody {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    kind: String,
    sdp: String,
}

#[derive(Serialize)]
struct WebRtcAnswerBody {
    #[serde(rename = "type")]
    kind: &'static str,
    sdp: String,
}

async fn webrtc_negotiate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<WebRtcOfferBody>,
) -> Result<Json<WebRtcAnswerBody>, ApiError> {
    let session = state.session(id).await?;
    let bridge = session.bridge().await.ok_or_else(|| ApiError::Conflict("session is not streaming audio".to_string()))?;
    let (sdp, track) = bridge.negotiate(&body.sdp).await?;
    let frame_ms = bridge.frame_ms();

    tokio::spawn(async move {
        loop {
            match bridge.pop_frame() {
                Some(frame) => {
                    if crate::bridge::write_frame(&track, &frame, frame_ms).await.is_err() {
                        break;
                    }
                }
                None => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
            }
        }
    });

    Ok(Json(WebRtcAnswerBody { kind: "answer", sdp }))
}

#[derive(Serialize)]
struct MidiInputsBody {
    names: Vec<String>,
}

async fn list_midi_inputs() -> Json<MidiInputsBody> {
    Json(MidiInputsBody { names: midi_input::list_input_names() })
}

#[derive(Deserialize)]
struct BindMidiInputBody {
    name: String,
}

async fn bind_midi_input(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(body): Json<BindMidiInputBody>) -> Result<(), ApiError> {
    let session = state.session(id).await?;
    session.bind_midi_input(&body.name).await
}
