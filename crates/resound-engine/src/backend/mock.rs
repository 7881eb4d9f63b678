//! Scriptable in-memory backend.
//!
//! `MockBackend` implements the full [`AudioBackend`] surface against plain
//! data structures so engine behavior can be driven and observed without an
//! audio device. Playback does not advance on its own; tests call
//! [`MockBackend::advance`] to simulate a voice consuming bytes, then run a
//! tick and assert on the resulting state or on the recorded
//! [`MockEvent`] log.

use std::collections::HashMap;

use glam::Vec3;
use parking_lot::Mutex;

use super::{
    AudioBackend, BackendError, ContextId, DeviceId, Extension, ReverbPreset, VoiceId, VoiceState,
};
use crate::format::PcmFormat;

/// One recorded parameter application, in call order.
///
/// `Suspend`/`Process` markers bracket the entries applied under the
/// deferred-update barrier, so tests can assert both content and atomicity.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    Suspend,
    Process,
    ListenerPosition(Vec3),
    ListenerVelocity(Vec3),
    ListenerOrientation(Vec3, Vec3),
    DistanceFactor(f32),
    DopplerFactor(f32),
    Reverb(ReverbPreset),
    VoicePosition(VoiceId, Vec3),
    VoiceVelocity(VoiceId, Vec3),
    VoiceConeAngles(VoiceId, u32, u32),
    VoiceConeOrientation(VoiceId, Vec3),
    VoiceConeOutsideVolume(VoiceId, f32),
    VoiceDistances(VoiceId, f32, f32),
    VoiceRolloff(VoiceId, f32),
    VoiceRelative(VoiceId, bool),
}

#[derive(Default)]
struct MockVoice {
    state: Option<VoiceState>,
    looping: bool,
    /// Resident data length, when attached as one block.
    resident: Option<usize>,
    /// Queued chunk payloads, oldest first.
    chunks: Vec<Vec<u8>>,
    /// Whole queued chunks fully consumed but not yet unqueued.
    processed: usize,
    /// Bytes consumed, relative to the start of the chunk queue (streaming)
    /// or of the resident block.
    cursor: usize,
}

impl MockVoice {
    fn state(&self) -> VoiceState {
        self.state.unwrap_or(VoiceState::Initial)
    }

    fn queued_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    fn recount_processed(&mut self) {
        let mut consumed = 0;
        let mut processed = 0;
        for chunk in &self.chunks {
            if consumed + chunk.len() <= self.cursor {
                consumed += chunk.len();
                processed += 1;
            } else {
                break;
            }
        }
        self.processed = processed;
    }
}

struct MockState {
    refuse_devices: bool,
    voice_limit: usize,
    missing_extensions: Vec<Extension>,
    next_id: u64,
    devices: HashMap<u64, String>,
    contexts: HashMap<u64, u64>,
    current: Option<ContextId>,
    voices: HashMap<u64, MockVoice>,
    suspend_depth: u32,
    events: Vec<MockEvent>,
}

/// In-memory [`AudioBackend`] for tests and headless runs.
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                refuse_devices: false,
                voice_limit: 16,
                missing_extensions: Vec::new(),
                next_id: 1,
                devices: HashMap::new(),
                contexts: HashMap::new(),
                current: None,
                voices: HashMap::new(),
                suspend_depth: 0,
                events: Vec::new(),
            }),
        }
    }

    /// Caps how many voices [`AudioBackend::create_voice`] will grant.
    pub fn with_voice_limit(self, limit: usize) -> Self {
        self.state.lock().voice_limit = limit;
        self
    }

    /// Makes every device open fail, as if no driver were present.
    pub fn refuse_devices(self) -> Self {
        self.state.lock().refuse_devices = true;
        self
    }

    /// Reports `extension` as unsupported during probing.
    pub fn without_extension(self, extension: Extension) -> Self {
        self.state.lock().missing_extensions.push(extension);
        self
    }

    /// Simulates the voice consuming `bytes` of queued or resident data.
    pub fn advance(&self, voice: VoiceId, bytes: usize) {
        let mut state = self.state.lock();
        let voice = state.voices.get_mut(&voice.0).expect("unknown voice");
        if voice.state() != VoiceState::Playing {
            return;
        }
        voice.cursor += bytes;
        if let Some(len) = voice.resident {
            if voice.cursor >= len {
                if voice.looping && len > 0 {
                    voice.cursor %= len;
                } else {
                    voice.cursor = len;
                    voice.state = Some(VoiceState::Stopped);
                }
            }
        } else {
            let total = voice.queued_bytes();
            if voice.cursor >= total {
                voice.cursor = total;
                voice.state = Some(VoiceState::Stopped);
            }
            voice.recount_processed();
        }
    }

    /// Snapshot of the recorded parameter/barrier log.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Payloads currently queued on a streaming voice, oldest first.
    pub fn queued_chunk_data(&self, voice: VoiceId) -> Vec<Vec<u8>> {
        self.state.lock().voices[&voice.0].chunks.clone()
    }

    pub fn live_voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Ids of all live voices, in creation order.
    pub fn voice_ids(&self) -> Vec<VoiceId> {
        let state = self.state.lock();
        let mut ids: Vec<u64> = state.voices.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(VoiceId).collect()
    }

    /// Voices currently in the playing state.
    pub fn playing_voices(&self) -> Vec<VoiceId> {
        let state = self.state.lock();
        let mut ids: Vec<u64> = state
            .voices
            .iter()
            .filter(|(_, voice)| voice.state() == VoiceState::Playing)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(VoiceId).collect()
    }

    pub fn open_device_count(&self) -> usize {
        self.state.lock().devices.len()
    }

    fn record(&self, event: MockEvent) {
        self.state.lock().events.push(event);
    }

    fn with_voice<R>(&self, voice: VoiceId, f: impl FnOnce(&mut MockVoice) -> R) -> R {
        let mut state = self.state.lock();
        f(state.voices.get_mut(&voice.0).expect("unknown voice"))
    }
}

impl AudioBackend for MockBackend {
    fn open_device(&self, identity: &str) -> Result<DeviceId, BackendError> {
        let mut state = self.state.lock();
        if state.refuse_devices {
            return Err(BackendError("device refused".into()));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.devices.insert(id, identity.to_owned());
        Ok(DeviceId(id))
    }

    fn close_device(&self, device: DeviceId) {
        let removed = self.state.lock().devices.remove(&device.0);
        debug_assert!(removed.is_some(), "closing unknown device");
    }

    fn create_context(&self, device: DeviceId) -> Result<ContextId, BackendError> {
        let mut state = self.state.lock();
        if !state.devices.contains_key(&device.0) {
            return Err(BackendError("context on closed device".into()));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.contexts.insert(id, device.0);
        Ok(ContextId(id))
    }

    fn destroy_context(&self, context: ContextId) {
        let mut state = self.state.lock();
        debug_assert_ne!(
            state.current,
            Some(context),
            "destroying the current context"
        );
        state.contexts.remove(&context.0);
    }

    fn current_context(&self) -> Option<ContextId> {
        self.state.lock().current
    }

    fn make_current(&self, context: Option<ContextId>) {
        self.state.lock().current = context;
    }

    fn has_extension(&self, _device: DeviceId, extension: Extension) -> bool {
        !self.state.lock().missing_extensions.contains(&extension)
    }

    fn create_voice(&self) -> Result<VoiceId, BackendError> {
        let mut state = self.state.lock();
        if state.voices.len() >= state.voice_limit {
            return Err(BackendError("voice limit reached".into()));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.voices.insert(id, MockVoice::default());
        Ok(VoiceId(id))
    }

    fn delete_voice(&self, voice: VoiceId) {
        self.state.lock().voices.remove(&voice.0);
    }

    fn play_voice(&self, voice: VoiceId) {
        self.with_voice(voice, |v| v.state = Some(VoiceState::Playing));
    }

    fn stop_voice(&self, voice: VoiceId) {
        self.with_voice(voice, |v| v.state = Some(VoiceState::Stopped));
    }

    fn voice_state(&self, voice: VoiceId) -> VoiceState {
        self.with_voice(voice, |v| v.state())
    }

    fn voice_byte_offset(&self, voice: VoiceId) -> usize {
        self.with_voice(voice, |v| v.cursor)
    }

    fn attach_resident(&self, voice: VoiceId, data: &[u8], _format: &PcmFormat) {
        self.with_voice(voice, |v| {
            v.resident = Some(data.len());
            v.chunks.clear();
            v.processed = 0;
            v.cursor = 0;
        });
    }

    fn detach(&self, voice: VoiceId) {
        self.with_voice(voice, |v| {
            v.resident = None;
            v.chunks.clear();
            v.processed = 0;
            v.cursor = 0;
            v.state = Some(VoiceState::Initial);
        });
    }

    fn set_voice_looping(&self, voice: VoiceId, looping: bool) {
        self.with_voice(voice, |v| v.looping = looping);
    }

    fn queue_chunk(&self, voice: VoiceId, data: &[u8], _format: &PcmFormat) {
        self.with_voice(voice, |v| v.chunks.push(data.to_vec()));
    }

    fn unqueue_chunks(&self, voice: VoiceId, count: usize) {
        self.with_voice(voice, |v| {
            debug_assert!(count <= v.processed, "unqueuing unprocessed chunks");
            let bytes: usize = v.chunks.drain(..count).map(|chunk| chunk.len()).sum();
            v.cursor = v.cursor.saturating_sub(bytes);
            v.processed -= count;
        });
    }

    fn queued_chunks(&self, voice: VoiceId) -> usize {
        self.with_voice(voice, |v| v.chunks.len())
    }

    fn processed_chunks(&self, voice: VoiceId) -> usize {
        self.with_voice(voice, |v| v.processed)
    }

    fn set_voice_position(&self, voice: VoiceId, position: Vec3) {
        self.record(MockEvent::VoicePosition(voice, position));
    }

    fn set_voice_velocity(&self, voice: VoiceId, velocity: Vec3) {
        self.record(MockEvent::VoiceVelocity(voice, velocity));
    }

    fn set_voice_cone_angles(&self, voice: VoiceId, inside: u32, outside: u32) {
        self.record(MockEvent::VoiceConeAngles(voice, inside, outside));
    }

    fn set_voice_cone_orientation(&self, voice: VoiceId, direction: Vec3) {
        self.record(MockEvent::VoiceConeOrientation(voice, direction));
    }

    fn set_voice_cone_outside_volume(&self, voice: VoiceId, gain: f32) {
        self.record(MockEvent::VoiceConeOutsideVolume(voice, gain));
    }

    fn set_voice_distances(&self, voice: VoiceId, min: f32, max: f32) {
        self.record(MockEvent::VoiceDistances(voice, min, max));
    }

    fn set_voice_rolloff(&self, voice: VoiceId, rolloff: f32) {
        self.record(MockEvent::VoiceRolloff(voice, rolloff));
    }

    fn set_voice_relative(&self, voice: VoiceId, relative: bool) {
        self.record(MockEvent::VoiceRelative(voice, relative));
    }

    fn set_listener_position(&self, position: Vec3) {
        self.record(MockEvent::ListenerPosition(position));
    }

    fn set_listener_velocity(&self, velocity: Vec3) {
        self.record(MockEvent::ListenerVelocity(velocity));
    }

    fn set_listener_orientation(&self, front: Vec3, top: Vec3) {
        self.record(MockEvent::ListenerOrientation(front, top));
    }

    fn set_distance_factor(&self, factor: f32) {
        self.record(MockEvent::DistanceFactor(factor));
    }

    fn set_doppler_factor(&self, factor: f32) {
        self.record(MockEvent::DopplerFactor(factor));
    }

    fn set_reverb(&self, preset: ReverbPreset) {
        self.record(MockEvent::Reverb(preset));
    }

    fn suspend_updates(&self) {
        let mut state = self.state.lock();
        state.suspend_depth += 1;
        state.events.push(MockEvent::Suspend);
    }

    fn process_updates(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.suspend_depth > 0, "unbalanced process_updates");
        state.suspend_depth = state.suspend_depth.saturating_sub(1);
        state.events.push(MockEvent::Process);
    }
}
