//! Pulls audio blocks from the engine worker, resamples to 48 kHz when the
//! engine's sample rate differs, slices into fixed-duration frames, and
//! serves them through a WebRTC peer connection with drop-oldest
//! backpressure.

use crate::error::ApiError;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const TARGET_SR: u32 = 48_000;
const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Frame {
    pub samples: Vec<f32>,
    pub timestamp_ms: u64,
}

struct ResampleState {
    resampler: SincFixedIn<f32>,
    chunk_size: usize,
    left_buf: Vec<f32>,
    right_buf: Vec<f32>,
}

/// One session's bridge state; 1:many with connected peers, each tracked by
/// its own negotiation token so stale ICE-gathering continuations discard
/// their work on renegotiation.
pub struct AudioBridge {
    engine_sr: u32,
    frame_ms: u32,
    queue_max: usize,
    queue_target: usize,
    resample: Option<Mutex<ResampleState>>,
    leftover: Mutex<Vec<f32>>,
    ring: Mutex<VecDeque<Frame>>,
    dropped_frames: AtomicU64,
    next_timestamp_ms: AtomicU64,
    negotiation_token: AtomicU64,
}

impl AudioBridge {
    pub fn new(engine_sr: u32) -> Arc<Self> {
        Self::with_config(engine_sr, 10, 4, 2)
    }

    pub fn with_config(engine_sr: u32, frame_ms: u32, queue_max: usize, queue_target: usize) -> Arc<Self> {
        let resample = if engine_sr != TARGET_SR {
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let chunk_size = 1024;
            let resampler = SincFixedIn::<f32>::new(TARGET_SR as f64 / engine_sr as f64, 2.0, params, chunk_size, 1)
                .expect("resampler configuration is valid");
            Some(Mutex::new(ResampleState { resampler, chunk_size, left_buf: Vec::new(), right_buf: Vec::new() }))
        } else {
            None
        };

        Arc::new(Self {
            engine_sr,
            frame_ms,
            queue_max,
            queue_target,
            resample,
            leftover: Mutex::new(Vec::new()),
            ring: Mutex::new(VecDeque::new()),
            dropped_frames: AtomicU64::new(0),
            next_timestamp_ms: AtomicU64::new(0),
            negotiation_token: AtomicU64::new(0),
        })
    }

    pub fn frame_ms(&self) -> u32 {
        self.frame_ms
    }

    fn frame_samples(&self) -> usize {
        (TARGET_SR as usize * self.frame_ms as usize / 1000) * 2
    }

    /// Accepts an interleaved stereo block at `engine_sr`, resamples it to
    /// 48 kHz if needed, and enqueues whole frames. Oldest frames are
    /// dropped, never the newest, once the ring exceeds `queue_max`.
    pub fn push_block(&self, block: &[f32]) {
        if block.is_empty() {
            return;
        }
        let resampled = match &self.resample {
            Some(state) => self.resample_block(state, block),
            None => block.to_vec(),
        };
        self.enqueue_frames(&resampled);
    }

    fn resample_block(&self, state: &Mutex<ResampleState>, block: &[f32]) -> Vec<f32> {
        let mut state = state.lock().expect("resampler mutex poisoned");
        for pair in block.chunks_exact(2) {
            state.left_buf.push(pair[0]);
            state.right_buf.push(pair[1]);
        }
        let mut out = Vec::new();
        while state.left_buf.len() >= state.chunk_size {
            let chunk_size = state.chunk_size;
            let left: Vec<f32> = state.left_buf.drain(..chunk_size).collect();
            let right: Vec<f32> = state.right_buf.drain(..chunk_size).collect();
            if let Ok(resampled) = state.resampler.process(&[left, right], None) {
                let l = &resampled[0];
                let r = &resampled[1];
                for i in 0..l.len().min(r.len()) {
                    out.push(l[i]);
                    out.push(r[i]);
                }
            }
        }
        out
    }

    fn enqueue_frames(&self, samples: &[f32]) {
        let frame_len = self.frame_samples();
        if frame_len == 0 {
            return;
        }
        let mut leftover = self.leftover.lock().expect("bridge leftover mutex poisoned");
        leftover.extend_from_slice(samples);

        let mut ring = self.ring.lock().expect("bridge ring mutex poisoned");
        let mut offset = 0;
        while leftover.len() - offset >= frame_len {
            let timestamp_ms = self.next_timestamp_ms.fetch_add(self.frame_ms as u64, Ordering::SeqCst);
            ring.push_back(Frame { samples: leftover[offset..offset + frame_len].to_vec(), timestamp_ms });
            offset += frame_len;
            while ring.len() > self.queue_max {
                ring.pop_front();
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            }
        }
        leftover.drain(..offset);
    }

    /// Pops the oldest ready frame. When the ring sits below `queue_target`
    /// and `flush_on_connect` requests it, the caller may call this in a
    /// tight loop to flush the backlog instead of pacing by wall-clock time.
    pub fn pop_frame(&self) -> Option<Frame> {
        self.ring.lock().expect("bridge ring mutex poisoned").pop_front()
    }

    pub fn queue_len(&self) -> usize {
        self.ring.lock().expect("bridge ring mutex poisoned").len()
    }

    pub fn below_target(&self) -> bool {
        self.queue_len() < self.queue_target
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn next_negotiation_token(&self) -> u64 {
        self.negotiation_token.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_negotiation_token(&self) -> u64 {
        self.negotiation_token.load(Ordering::SeqCst)
    }

    pub fn detach(&self) {
        self.ring.lock().expect("bridge ring mutex poisoned").clear();
        self.negotiation_token.fetch_add(1, Ordering::SeqCst);
    }

    /// Negotiates a peer connection carrying one audio track fed by this
    /// bridge's frame queue. Returns the SDP answer. The caller is expected
    /// to spawn a task pacing `pop_frame`/`write_sample` at `frame_ms`
    /// cadence using the returned track.
    pub async fn negotiate(self: &Arc<Self>, offer_sdp: &str) -> Result<(String, Arc<TrackLocalStaticSample>), ApiError> {
        let token = self.next_negotiation_token();

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| ApiError::Transport(e.to_string()))?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| ApiError::Transport(e.to_string()))?;
        let api = APIBuilder::new().with_media_engine(media_engine).with_interceptor_registry(registry).build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer { urls: vec!["stun:stun.l.google.com:19302".to_string()], ..Default::default() }],
            ..Default::default()
        };
        let peer_connection = api.new_peer_connection(config).await.map_err(|e| ApiError::Transport(e.to_string()))?;

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability { mime_type: "audio/opus".to_string(), clock_rate: TARGET_SR, channels: 2, ..Default::default() },
            "audio".to_string(),
            "daw-session".to_string(),
        ));
        peer_connection.add_track(track.clone() as Arc<dyn TrackLocal>).await.map_err(|e| ApiError::Transport(e.to_string()))?;

        let offer = RTCSessionDescription::offer(offer_sdp.to_string()).map_err(|e| ApiError::Transport(e.to_string()))?;
        peer_connection.set_remote_description(offer).await.map_err(|e| ApiError::Transport(e.to_string()))?;

        let answer = peer_connection.create_answer(None).await.map_err(|e| ApiError::Transport(e.to_string()))?;
        let mut gather_complete = peer_connection.gathering_complete_promise().await;
        peer_connection.set_local_description(answer).await.map_err(|e| ApiError::Transport(e.to_string()))?;

        tokio::time::timeout(NEGOTIATION_TIMEOUT, gather_complete.recv()).await.map_err(|_| ApiError::Transport("ICE gathering timed out".to_string()))?;

        if self.current_negotiation_token() != token {
            return Err(ApiError::Transport("negotiation superseded by a newer request".to_string()));
        }

        let local_description = peer_connection.local_description().await.ok_or_else(|| ApiError::Transport("missing local description".to_string()))?;
        Ok((local_description.sdp, track))
    }
}

/// Writes one frame onto a negotiated track. Separated from `pop_frame` so
/// callers can pace delivery against the frame's own timestamp.
pub async fn write_frame(track: &TrackLocalStaticSample, frame: &Frame, frame_ms: u32) -> Result<(), ApiError> {
    let pcm: Vec<u8> = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    track
        .write_sample(&Sample { data: pcm.into(), duration: Duration::from_millis(frame_ms as u64), ..Default::default() })
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_exactly_frame_duration_apart() {
        let bridge = AudioBridge::with_config(48_000, 10, 4, 2);
        let block = vec![0.0f32; 48_000 * 2 / 100 * 5];
        bridge.push_block(&block);
        let first = bridge.pop_frame().unwrap();
        let second = bridge.pop_frame().unwrap();
        assert_eq!(second.timestamp_ms - first.timestamp_ms, 10);
    }

    #[test]
    fn overflow_drops_oldest_not_newest() {
        let bridge = AudioBridge::with_config(48_000, 10, 2, 1);
        let frame_samples = 48_000 * 10 / 1000 * 2;
        for _ in 0..5 {
            bridge.push_block(&vec![0.0f32; frame_samples]);
        }
        assert_eq!(bridge.queue_len(), 2);
        assert!(bridge.dropped_frames() >= 3);
        let remaining = bridge.pop_frame().unwrap();
        assert_eq!(remaining.timestamp_ms, 30);
    }

    #[test]
    fn below_target_reports_correctly() {
        let bridge = AudioBridge::with_config(48_000, 10, 4, 2);
        assert!(bridge.below_target());
    }
}
