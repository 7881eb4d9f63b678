//! Logical playback buffers.
//!
//! A buffer owns its PCM data and a parameter snapshot but no voice; a voice
//! is borrowed from the session pool on [`BufferHandle::play`] and returned
//! on stop, end-of-data, or drop. Static buffers hand the voice their whole
//! data block; streaming buffers are refilled chunk by chunk from the
//! session tick.

use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::backend::VoiceState;
use crate::error::EngineError;
use crate::format::PcmFormat;
use crate::notify::{NotifyEvent, NotifyPosition};
use crate::session::DeviceSession;
use crate::spatial::{
    Buffer3dParam, DirtyMask, Mode3d, Voice3dParams, VoiceDirty, apply_voice_params,
};
use crate::stream;

bitflags! {
    /// Controls a buffer is created with. Operations gated on a control fail
    /// with [`EngineError::ControlUnavailable`] when it is absent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferCaps: u32 {
        /// Spatialization parameters may be set on this buffer.
        const CTRL_3D = 1 << 0;
        /// Position and stop notifications may be registered.
        const CTRL_NOTIFY = 1 << 1;
    }
}

/// How the buffer's data reaches its voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// The whole data block is attached to the voice at play time.
    Static,
    /// Data is queued in chunks and refilled by the session tick.
    Streaming,
}

/// Creation parameters for [`SessionHandle::create_buffer`].
///
/// [`SessionHandle::create_buffer`]: crate::session::SessionHandle::create_buffer
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc {
    pub format: PcmFormat,
    /// Data length in bytes; must be a whole number of sample frames.
    pub length: usize,
    pub mode: BufferMode,
    pub caps: BufferCaps,
}

/// Transport state of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlayState {
    Stopped,
    Playing { looping: bool },
}

pub(crate) struct PositionNotify {
    pub(crate) position: NotifyPosition,
    pub(crate) event: NotifyEvent,
}

pub(crate) struct BufferState {
    pub(crate) data: Vec<u8>,
    pub(crate) play: PlayState,
    /// Pool slot of the borrowed voice, while one is held.
    pub(crate) slot: Option<usize>,
    /// Streaming read cursor into `data`: the next byte to feed.
    pub(crate) cursor: usize,
    /// Logical play offset of the first queued chunk (streaming).
    pub(crate) queue_base: usize,
    /// Chunk size used by the feeder; zero while resident.
    pub(crate) seg_size: usize,
    /// Play position at the previous notification sweep.
    pub(crate) last_pos: usize,
    pub(crate) notifies: Vec<PositionNotify>,
}

pub(crate) struct BufferShared {
    pub(crate) session: Weak<DeviceSession>,
    pub(crate) format: PcmFormat,
    pub(crate) mode: BufferMode,
    pub(crate) caps: BufferCaps,
    pub(crate) length: usize,
    pub(crate) state: Mutex<BufferState>,
    /// Deferred 3D fields staged for the next session commit.
    pub(crate) dirty: DirtyMask,
    /// Current 3D parameter snapshot, committed or not.
    pub(crate) pending: Mutex<Voice3dParams>,
}

impl Drop for BufferShared {
    fn drop(&mut self) {
        // Only the retired queue here: the session state lock may be held
        // by a tick that is about to drop its last strong reference to us.
        let slot = self.state.get_mut().slot.take();
        if let (Some(slot), Some(session)) = (slot, self.session.upgrade()) {
            session.retired.lock().push(slot);
        }
    }
}

/// Client handle to a logical buffer. Clones share the same buffer.
#[derive(Clone)]
pub struct BufferHandle {
    pub(crate) shared: Arc<BufferShared>,
}

impl BufferHandle {
    pub(crate) fn new(session: Weak<DeviceSession>, desc: BufferDesc) -> Self {
        let mut params = Voice3dParams::default();
        if !desc.caps.contains(BufferCaps::CTRL_3D) {
            params.mode = Mode3d::Disabled;
        }
        Self {
            shared: Arc::new(BufferShared {
                session,
                format: desc.format,
                mode: desc.mode,
                caps: desc.caps,
                length: desc.length,
                state: Mutex::new(BufferState {
                    data: vec![desc.format.silence_byte(); desc.length],
                    play: PlayState::Stopped,
                    slot: None,
                    cursor: 0,
                    queue_base: 0,
                    seg_size: 0,
                    last_pos: 0,
                    notifies: Vec::new(),
                }),
                dirty: DirtyMask::default(),
                pending: Mutex::new(params),
            }),
        }
    }

    pub fn format(&self) -> PcmFormat {
        self.shared.format
    }

    pub fn length(&self) -> usize {
        self.shared.length
    }

    /// Copies `data` into the buffer at `offset`. Allowed at any time,
    /// including while playing; a playing static voice keeps rendering the
    /// block it was attached with until the next play.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), EngineError> {
        let end = offset
            .checked_add(data.len())
            .ok_or(EngineError::InvalidParameter("write range overflow"))?;
        if end > self.shared.length {
            return Err(EngineError::InvalidParameter("write past end of buffer"));
        }
        let mut state = self.shared.state.lock();
        state.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Starts (or restarts parameters of) playback.
    ///
    /// A stopped buffer borrows a voice from the pool; when every voice is
    /// in use this fails with [`EngineError::ResourceExhausted`] and the
    /// buffer stays stopped. Calling play on a playing buffer only updates
    /// the loop flag.
    pub fn play(&self, looping: bool) -> Result<(), EngineError> {
        let session = self.shared.session.upgrade().ok_or(EngineError::NotInitialized)?;
        let mut sstate = session.state.lock();
        if !sstate.open {
            return Err(EngineError::NotInitialized);
        }
        let mut state = self.shared.state.lock();

        if let PlayState::Playing { looping: current } = state.play {
            // A resident voice may have run out since the last tick; in that
            // case fall through and restart it in place.
            let ended = {
                let guard = session.enter_context();
                match state.slot {
                    Some(slot) if self.shared.mode == BufferMode::Static => !matches!(
                        guard.backend().voice_state(sstate.voices[slot]),
                        VoiceState::Playing | VoiceState::Paused
                    ),
                    _ => false,
                }
            };
            if !ended {
                if current != looping {
                    state.play = PlayState::Playing { looping };
                    if self.shared.mode == BufferMode::Static {
                        if let Some(slot) = state.slot {
                            let guard = session.enter_context();
                            guard
                                .backend()
                                .set_voice_looping(sstate.voices[slot], looping);
                        }
                    }
                }
                return Ok(());
            }
        }

        let fresh_slot = state.slot.is_none();
        let slot = match state.slot {
            Some(slot) => slot,
            None => {
                let slot = sstate.pool.acquire().ok_or(EngineError::ResourceExhausted)?;
                sstate.owners[slot] = Some(Arc::downgrade(&self.shared));
                state.slot = Some(slot);
                slot
            }
        };
        let voice = sstate.voices[slot];

        let guard = session.enter_context();
        if fresh_slot {
            // Full parameter push; stale deferred bits are covered by it.
            self.shared.dirty.take();
            let params = *self.shared.pending.lock();
            apply_voice_params(
                guard.backend(),
                voice,
                &params,
                VoiceDirty::all(),
                sstate.listener.params.rolloff_factor,
            );
        }

        state.play = PlayState::Playing { looping };
        state.cursor = 0;
        state.queue_base = 0;
        state.last_pos = 0;
        match self.shared.mode {
            BufferMode::Static => {
                state.seg_size = 0;
                guard.backend().attach_resident(voice, &state.data, &self.shared.format);
                guard.backend().set_voice_looping(voice, looping);
                guard.backend().play_voice(voice);
            }
            BufferMode::Streaming => {
                state.seg_size = stream::chunk_size(&self.shared.format);
                guard.backend().detach(voice);
                // Priming also starts the voice once chunks are queued.
                stream::feed_voice(
                    guard.backend(),
                    voice,
                    &self.shared.format,
                    &mut state,
                    &mut sstate.scratch,
                );
            }
        }

        if self.shared.caps.contains(BufferCaps::CTRL_NOTIFY) && !state.notifies.is_empty() {
            let tracked = sstate
                .active
                .iter()
                .any(|weak| weak.upgrade().is_some_and(|b| Arc::ptr_eq(&b, &self.shared)));
            if !tracked {
                sstate.active.push(Arc::downgrade(&self.shared));
            }
        }
        tracing::debug!(slot, looping, mode = ?self.shared.mode, "buffer playing");
        Ok(())
    }

    /// Stops playback and returns the voice to the pool. Registered stop
    /// notifications fire before this returns. The play position resets to
    /// the start.
    pub fn stop(&self) -> Result<(), EngineError> {
        let session = self.shared.session.upgrade().ok_or(EngineError::NotInitialized)?;
        let mut sstate = session.state.lock();
        if !sstate.open {
            return Err(EngineError::NotInitialized);
        }
        let mut state = self.shared.state.lock();

        let was_playing = matches!(state.play, PlayState::Playing { .. });
        state.play = PlayState::Stopped;
        if let Some(slot) = state.slot.take() {
            let guard = session.enter_context();
            sstate.release_slot(guard.backend(), slot);
        }
        sstate
            .active
            .retain(|weak| weak.upgrade().is_some_and(|b| !Arc::ptr_eq(&b, &self.shared)));
        state.cursor = 0;
        state.queue_base = 0;
        state.seg_size = 0;
        state.last_pos = 0;

        if was_playing {
            fire_stop_notifies(&state);
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.shared.state.lock().play, PlayState::Playing { .. })
    }

    /// Current play position in bytes from the start of the buffer.
    pub fn play_position(&self) -> Result<usize, EngineError> {
        let session = self.shared.session.upgrade().ok_or(EngineError::NotInitialized)?;
        let sstate = session.state.lock();
        if !sstate.open {
            return Err(EngineError::NotInitialized);
        }
        let state = self.shared.state.lock();
        let (Some(slot), PlayState::Playing { looping }) = (state.slot, state.play) else {
            return Ok(0);
        };
        let guard = session.enter_context();
        let raw = guard.backend().voice_byte_offset(sstate.voices[slot]);
        let position = if state.seg_size == 0 {
            raw
        } else {
            raw + state.queue_base
        };
        if position < self.shared.length {
            Ok(position)
        } else if looping {
            Ok(position % self.shared.length)
        } else {
            Ok(self.shared.length)
        }
    }

    /// Registers a notification and returns the event that will be
    /// signaled. Offset notifications fire when playback crosses the offset;
    /// [`NotifyPosition::Stop`] fires when the buffer stops for any reason.
    /// Registration is rejected while the buffer is playing.
    pub fn register_notification(
        &self,
        position: NotifyPosition,
    ) -> Result<NotifyEvent, EngineError> {
        if !self.shared.caps.contains(BufferCaps::CTRL_NOTIFY) {
            return Err(EngineError::ControlUnavailable);
        }
        if let NotifyPosition::Offset(offset) = position {
            if offset >= self.shared.length {
                return Err(EngineError::InvalidParameter("notify offset past end"));
            }
        }
        let mut state = self.shared.state.lock();
        if matches!(state.play, PlayState::Playing { .. }) {
            return Err(EngineError::InvalidParameter(
                "notifications locked while playing",
            ));
        }
        let event = NotifyEvent::new();
        state.notifies.push(PositionNotify {
            position,
            event: event.clone(),
        });
        Ok(event)
    }

    /// Drops every registered notification. Rejected while playing.
    pub fn clear_notifications(&self) -> Result<(), EngineError> {
        if !self.shared.caps.contains(BufferCaps::CTRL_NOTIFY) {
            return Err(EngineError::ControlUnavailable);
        }
        let mut state = self.shared.state.lock();
        if matches!(state.play, PlayState::Playing { .. }) {
            return Err(EngineError::InvalidParameter(
                "notifications locked while playing",
            ));
        }
        state.notifies.clear();
        Ok(())
    }

    /// Sets one 3D parameter. With `deferred` the write is staged until the
    /// session's next commit; otherwise it reaches the voice immediately
    /// (when one is held; a stopped buffer just updates its snapshot).
    pub fn set_3d_param(&self, param: Buffer3dParam, deferred: bool) -> Result<(), EngineError> {
        if !self.shared.caps.contains(BufferCaps::CTRL_3D) {
            return Err(EngineError::ControlUnavailable);
        }
        param.validate()?;

        if deferred {
            let bit = param.store(&mut self.shared.pending.lock());
            self.shared.dirty.mark(bit.bits());
            return Ok(());
        }

        let session = self.shared.session.upgrade().ok_or(EngineError::NotInitialized)?;
        let sstate = session.state.lock();
        if !sstate.open {
            return Err(EngineError::NotInitialized);
        }
        let mut pending = self.shared.pending.lock();
        let bit = param.store(&mut pending);
        let params = *pending;
        drop(pending);

        let state = self.shared.state.lock();
        if let Some(slot) = state.slot {
            let guard = session.enter_context();
            apply_voice_params(
                guard.backend(),
                sstate.voices[slot],
                &params,
                bit,
                sstate.listener.params.rolloff_factor,
            );
        }
        Ok(())
    }

    /// Current 3D parameter snapshot, including uncommitted deferred writes.
    pub fn params_3d(&self) -> Result<Voice3dParams, EngineError> {
        if !self.shared.caps.contains(BufferCaps::CTRL_3D) {
            return Err(EngineError::ControlUnavailable);
        }
        Ok(*self.shared.pending.lock())
    }
}

/// Signals every registered stop sentinel on `state`.
pub(crate) fn fire_stop_notifies(state: &BufferState) {
    for notify in &state.notifies {
        if notify.position == NotifyPosition::Stop {
            notify.event.signal();
        }
    }
}
