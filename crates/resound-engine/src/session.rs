//! Device sessions and the shared-session registry.
//!
//! A [`DeviceSession`] owns one backend device, one rendering context, and a
//! pre-allocated pool of voices shared by every buffer created against it.
//! Sessions are shared: opening the same device identity twice yields the
//! same underlying session with a bumped reference count, and the device is
//! torn down when the last [`SessionHandle`] drops.
//!
//! Backend calls that touch context resources run under a [`ContextGuard`],
//! which serializes context selection process-wide and restores the
//! previously current context on exit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::backend::{AudioBackend, ContextId, DeviceId, Extension, VoiceId, VoiceState};
use crate::buffer::{BufferDesc, BufferHandle, BufferShared, PlayState, fire_stop_notifies};
use crate::error::EngineError;
use crate::notify;
use crate::pool::VoicePool;
use crate::spatial::{
    ListenerDirty, ListenerParam, ListenerParams, ListenerState, Mode3d, VoiceDirty,
    apply_listener_params, apply_voice_params,
};
use crate::stream;

/// Upper bound on voices pre-allocated per device session. The usable count
/// is whatever the backend grants before its first refusal.
pub const MAX_VOICES: usize = 256;

/// Backend capabilities probed once when a session opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionSet {
    pub float32: bool,
    pub multichannel: bool,
    pub aux_effect_slots: bool,
    /// Whether the backend has a native deferred-update primitive. The
    /// commit path does not branch on this: backends without it emulate
    /// [`AudioBackend::suspend_updates`] / [`AudioBackend::process_updates`],
    /// so the flag is informational, surfaced through
    /// [`SessionHandle::extensions`] alongside the others.
    pub deferred_updates: bool,
}

impl ExtensionSet {
    fn probe(backend: &dyn AudioBackend, device: DeviceId) -> Self {
        Self {
            float32: backend.has_extension(device, Extension::Float32),
            multichannel: backend.has_extension(device, Extension::Multichannel),
            aux_effect_slots: backend.has_extension(device, Extension::AuxEffectSlots),
            deferred_updates: backend.has_extension(device, Extension::DeferredUpdates),
        }
    }
}

/// Scoped "make this context current" with restore-on-drop.
///
/// Holding the guard also holds the process-wide context lock, so no other
/// thread can swap the current context mid-operation.
pub(crate) struct ContextGuard<'a> {
    backend: &'a dyn AudioBackend,
    previous: Option<ContextId>,
    _lock: MutexGuard<'a, ()>,
}

impl<'a> ContextGuard<'a> {
    pub(crate) fn backend(&self) -> &'a dyn AudioBackend {
        self.backend
    }

    fn enter(backend: &'a dyn AudioBackend, lock: &'a Mutex<()>, context: ContextId) -> Self {
        let guard = lock.lock();
        let previous = backend.current_context();
        if previous != Some(context) {
            backend.make_current(Some(context));
        }
        Self {
            backend,
            previous,
            _lock: guard,
        }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if self.previous != self.backend.current_context() {
            self.backend.make_current(self.previous);
        }
    }
}

/// Mutable session state, all under one lock.
pub(crate) struct SessionState {
    /// Cleared on teardown; operations on surviving handles check it first.
    pub(crate) open: bool,
    pub(crate) pool: VoicePool,
    /// Backend voices by slot index. Fixed after session creation.
    pub(crate) voices: Vec<VoiceId>,
    /// Buffer owning each allocated slot, for rolloff distribution and
    /// deferred commits.
    pub(crate) owners: Vec<Option<Weak<BufferShared>>>,
    pub(crate) listener: ListenerState,
    /// Buffers with registered notifications that are (or recently were)
    /// playing. Serviced by the tick.
    pub(crate) active: Vec<Weak<BufferShared>>,
    /// Reusable staging buffer for streaming chunk assembly.
    pub(crate) scratch: Vec<u8>,
}

impl SessionState {
    /// Stops and unbinds the voice in `slot`, returning it to the pool.
    /// Caller holds the state lock and a context guard.
    pub(crate) fn release_slot(&mut self, backend: &dyn AudioBackend, slot: usize) {
        let voice = self.voices[slot];
        backend.stop_voice(voice);
        backend.detach(voice);
        self.owners[slot] = None;
        self.pool.release(slot);
    }
}

/// One open backend device with its context and voice pool.
pub(crate) struct DeviceSession {
    identity: String,
    pub(crate) backend: Arc<dyn AudioBackend>,
    context_lock: Arc<Mutex<()>>,
    device: DeviceId,
    context: ContextId,
    pub(crate) extensions: ExtensionSet,
    refs: AtomicUsize,
    pub(crate) state: Mutex<SessionState>,
    /// Slots abandoned by dropped buffers, reclaimed on the next tick or at
    /// close. Never locked together with `state` from the buffer side.
    pub(crate) retired: Mutex<Vec<usize>>,
}

impl DeviceSession {
    fn open(
        backend: Arc<dyn AudioBackend>,
        context_lock: Arc<Mutex<()>>,
        identity: &str,
    ) -> Result<Arc<Self>, EngineError> {
        let device = backend.open_device(identity).map_err(|err| {
            tracing::warn!(identity, error = %err, "device open failed");
            EngineError::NoDriver
        })?;
        let context = match backend.create_context(device) {
            Ok(context) => context,
            Err(err) => {
                tracing::warn!(identity, error = %err, "context creation failed");
                backend.close_device(device);
                return Err(EngineError::NoDriver);
            }
        };
        let extensions = ExtensionSet::probe(backend.as_ref(), device);

        let mut voices = Vec::new();
        {
            let guard = ContextGuard::enter(backend.as_ref(), &context_lock, context);
            for _ in 0..MAX_VOICES {
                match guard.backend.create_voice() {
                    Ok(voice) => voices.push(voice),
                    Err(_) => break,
                }
            }
        }
        if voices.is_empty() {
            tracing::warn!(identity, "session opened with no usable voices");
        }
        tracing::debug!(
            identity,
            voices = voices.len(),
            ?extensions,
            "device session opened"
        );

        let capacity = voices.len();
        Ok(Arc::new(Self {
            identity: identity.to_owned(),
            backend,
            context_lock,
            device,
            context,
            extensions,
            refs: AtomicUsize::new(1),
            state: Mutex::new(SessionState {
                open: true,
                pool: VoicePool::new(capacity),
                voices,
                owners: vec![None; capacity],
                listener: ListenerState::default(),
                active: Vec::new(),
                scratch: Vec::new(),
            }),
            retired: Mutex::new(Vec::new()),
        }))
    }

    pub(crate) fn enter_context(&self) -> ContextGuard<'_> {
        ContextGuard::enter(self.backend.as_ref(), &self.context_lock, self.context)
    }

    /// Releases backend resources. Runs once, when the last handle drops;
    /// buffers that outlive their session observe `open == false`.
    fn teardown(&self) {
        let mut state = self.state.lock();
        if !state.open {
            return;
        }
        state.open = false;

        let lock = self.context_lock.lock();
        let previous = self.backend.current_context();
        if previous != Some(self.context) {
            self.backend.make_current(Some(self.context));
        }
        for &voice in &state.voices {
            self.backend.delete_voice(voice);
        }
        let restore = if previous == Some(self.context) {
            None
        } else {
            previous
        };
        self.backend.make_current(restore);
        self.backend.destroy_context(self.context);
        self.backend.close_device(self.device);
        drop(lock);

        self.retired.lock().clear();
        tracing::debug!(identity = %self.identity, "device session closed");
    }
}

struct RegistryShared {
    backend: Arc<dyn AudioBackend>,
    sessions: Mutex<Vec<Arc<DeviceSession>>>,
    /// Process-wide context-selection lock shared by every session.
    context_lock: Arc<Mutex<()>>,
}

/// Entry point: opens shared device sessions over one backend.
pub struct SessionRegistry {
    shared: Arc<RegistryShared>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                backend,
                sessions: Mutex::new(Vec::new()),
                context_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Opens a session on the device named `identity`, joining an existing
    /// one when the same identity is already open.
    pub fn open_session(&self, identity: &str) -> Result<SessionHandle, EngineError> {
        let mut sessions = self.shared.sessions.lock();
        if let Some(session) = sessions.iter().find(|s| s.identity == identity) {
            session.refs.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(identity, "joined existing device session");
            return Ok(SessionHandle {
                registry: Arc::clone(&self.shared),
                session: Arc::clone(session),
            });
        }

        let session = DeviceSession::open(
            Arc::clone(&self.shared.backend),
            Arc::clone(&self.shared.context_lock),
            identity,
        )?;
        sessions.push(Arc::clone(&session));
        Ok(SessionHandle {
            registry: Arc::clone(&self.shared),
            session,
        })
    }

    /// Number of distinct device sessions currently open.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }
}

/// One reference to a shared [`DeviceSession`]. Dropping the handle releases
/// the reference; the last drop tears the device down.
pub struct SessionHandle {
    registry: Arc<RegistryShared>,
    session: Arc<DeviceSession>,
}

impl SessionHandle {
    /// Creates a logical buffer on this session. The buffer holds no voice
    /// until it plays.
    pub fn create_buffer(&self, desc: BufferDesc) -> Result<BufferHandle, EngineError> {
        desc.format.validate()?;
        if desc.length == 0 || desc.length % desc.format.block_align as usize != 0 {
            return Err(EngineError::InvalidParameter(
                "buffer length not a multiple of the frame size",
            ));
        }
        if desc.format.bits_per_sample == 32 && !self.session.extensions.float32 {
            return Err(EngineError::InvalidParameter(
                "32-bit samples unsupported by this device",
            ));
        }
        if desc.format.channels > 2 && !self.session.extensions.multichannel {
            return Err(EngineError::InvalidParameter(
                "more than two channels unsupported by this device",
            ));
        }
        let state = self.session.state.lock();
        if !state.open {
            return Err(EngineError::NotInitialized);
        }
        drop(state);

        Ok(BufferHandle::new(Arc::downgrade(&self.session), desc))
    }

    /// Sets one listener parameter. With `deferred` the write is staged for
    /// the next [`commit_deferred`](Self::commit_deferred); otherwise it is
    /// applied to the backend immediately.
    pub fn set_listener_param(
        &self,
        param: ListenerParam,
        deferred: bool,
    ) -> Result<(), EngineError> {
        param.validate()?;
        let mut state = self.session.state.lock();
        if !state.open {
            return Err(EngineError::NotInitialized);
        }
        let bit = param.store(&mut state.listener.params);
        if deferred {
            state.listener.dirty.mark(bit.bits());
            return Ok(());
        }

        let guard = self.session.enter_context();
        apply_listener_params(
            guard.backend,
            &state.listener.params,
            bit,
            self.session.extensions.aux_effect_slots,
        );
        if bit.contains(ListenerDirty::ROLLOFF_FACTOR) {
            distribute_rolloff(guard.backend, &state);
        }
        Ok(())
    }

    /// Current listener parameter snapshot, including uncommitted deferred
    /// writes.
    pub fn listener_params(&self) -> Result<ListenerParams, EngineError> {
        let state = self.session.state.lock();
        if !state.open {
            return Err(EngineError::NotInitialized);
        }
        Ok(state.listener.params)
    }

    /// Applies every deferred listener and buffer parameter in one batch,
    /// bracketed by the backend's suspend/process barrier so the mixer never
    /// observes a partial update.
    pub fn commit_deferred(&self) -> Result<(), EngineError> {
        let state = self.session.state.lock();
        if !state.open {
            return Err(EngineError::NotInitialized);
        }

        let guard = self.session.enter_context();
        guard.backend.suspend_updates();

        let dirty = ListenerDirty::from_bits_truncate(state.listener.dirty.take());
        apply_listener_params(
            guard.backend,
            &state.listener.params,
            dirty,
            self.session.extensions.aux_effect_slots,
        );
        let rolloff = state.listener.params.rolloff_factor;
        let rolloff_changed = dirty.contains(ListenerDirty::ROLLOFF_FACTOR);

        for slot in state.pool.allocated() {
            let Some(owner) = state.owners[slot].as_ref().and_then(Weak::upgrade) else {
                continue;
            };
            let voice = state.voices[slot];
            let bits = VoiceDirty::from_bits_truncate(owner.dirty.take());
            let params = *owner.pending.lock();
            if rolloff_changed
                && params.mode != Mode3d::Disabled
                && !bits.contains(VoiceDirty::MODE)
            {
                guard.backend.set_voice_rolloff(voice, rolloff);
            }
            apply_voice_params(guard.backend, voice, &params, bits, rolloff);
        }

        guard.backend.process_updates();
        Ok(())
    }

    /// Services the session: reclaims slots from dropped buffers, evaluates
    /// position and stop notifications, and refills streaming queues. Call
    /// periodically from any thread.
    pub fn tick(&self) {
        let mut state = self.session.state.lock();
        if !state.open {
            return;
        }
        let retired = std::mem::take(&mut *self.session.retired.lock());

        let guard = self.session.enter_context();
        for slot in retired {
            if state.pool.is_allocated(slot) {
                tracing::trace!(slot, "reclaiming slot from dropped buffer");
                state.release_slot(guard.backend, slot);
            }
        }
        notify::run_notifications(&mut state, guard.backend);
        stream::run_feeder(&mut state, guard.backend);
        reclaim_finished(&mut state, guard.backend);
    }

    /// Number of voices this session's pool can hand out.
    pub fn voice_capacity(&self) -> usize {
        self.session.state.lock().pool.capacity()
    }

    pub fn extensions(&self) -> ExtensionSet {
        self.session.extensions
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.session.identity)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let mut sessions = self.registry.sessions.lock();
        if self.session.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            sessions.retain(|s| !Arc::ptr_eq(s, &self.session));
            drop(sessions);
            self.session.teardown();
        }
    }
}

/// Returns voices whose resident playback ran out since the last tick.
/// Tracked (notifying) buffers are finalized by the notification sweep;
/// this pass catches fire-and-forget buffers nothing else watches.
fn reclaim_finished(state: &mut SessionState, backend: &dyn AudioBackend) {
    let slots: Vec<usize> = state.pool.allocated().collect();
    for slot in slots {
        let Some(owner) = state.owners[slot].as_ref().and_then(Weak::upgrade) else {
            continue;
        };
        let mut bstate = owner.state.lock();
        if bstate.seg_size != 0 {
            continue;
        }
        if !matches!(bstate.play, PlayState::Playing { looping: false }) {
            continue;
        }
        let vstate = backend.voice_state(state.voices[slot]);
        if matches!(vstate, VoiceState::Playing | VoiceState::Paused) {
            continue;
        }
        tracing::trace!(slot, "resident playback finished");
        bstate.play = PlayState::Stopped;
        fire_stop_notifies(&bstate);
        bstate.slot = None;
        bstate.cursor = 0;
        bstate.last_pos = 0;
        drop(bstate);
        state.release_slot(backend, slot);
    }
}

/// Pushes the listener rolloff factor to every allocated voice whose buffer
/// is spatialized. Disabled-mode voices keep rolloff zero.
pub(crate) fn distribute_rolloff(backend: &dyn AudioBackend, state: &SessionState) {
    let rolloff = state.listener.params.rolloff_factor;
    for slot in state.pool.allocated() {
        let Some(owner) = state.owners[slot].as_ref().and_then(Weak::upgrade) else {
            continue;
        };
        if owner.pending.lock().mode != Mode3d::Disabled {
            backend.set_voice_rolloff(state.voices[slot], rolloff);
        }
    }
}
