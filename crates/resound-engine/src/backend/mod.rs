//! Abstraction over the low-level audio library.
//!
//! The engine never talks to an audio device directly; everything goes
//! through [`AudioBackend`], which models the capability set the engine
//! assumes: devices, rendering contexts with a process-wide "current"
//! selection, voices with chunk queues and spatial parameters, a global
//! listener, and a suspend/process pair for atomic parameter batches.
//!
//! [`NullBackend`] is the inert fallback for builds without a usable audio
//! stack; [`mock::MockBackend`] is a scriptable implementation for tests and
//! headless tooling.

pub mod mock;

use glam::Vec3;
use thiserror::Error;

use crate::format::PcmFormat;

/// Opaque handle to an open backend device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u64);

/// Opaque handle to a rendering context on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// Opaque handle to a backend voice (one rendering channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

/// Transport state reported by a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Never started since creation or last detach.
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Optional backend capabilities probed once per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// 32-bit floating-point sample formats.
    Float32,
    /// More than two output channels per voice.
    Multichannel,
    /// Auxiliary effect slots (reverb routing).
    AuxEffectSlots,
    /// A dedicated deferred-update primitive. Backends without it are
    /// expected to emulate [`AudioBackend::suspend_updates`] /
    /// [`AudioBackend::process_updates`] with a context suspend/resume.
    DeferredUpdates,
}

/// Reverb environment applied through the device's auxiliary effect slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbPreset {
    Generic,
    Room,
    ConcertHall,
    Cave,
    Underwater,
}

/// Failure reported by a backend call.
///
/// Only device and context creation failures are fatal to the caller;
/// everything else degrades the affected buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("backend: {0}")]
pub struct BackendError(pub String);

/// The capability surface the engine consumes from the audio library.
///
/// All calls are bounded-time and synchronous. Calls that touch a context's
/// resources (voices, listener) assume that context is current; the engine
/// guarantees this with a scoped context guard.
pub trait AudioBackend: Send + Sync {
    fn open_device(&self, identity: &str) -> Result<DeviceId, BackendError>;
    fn close_device(&self, device: DeviceId);

    fn create_context(&self, device: DeviceId) -> Result<ContextId, BackendError>;
    fn destroy_context(&self, context: ContextId);
    fn current_context(&self) -> Option<ContextId>;
    fn make_current(&self, context: Option<ContextId>);

    fn has_extension(&self, device: DeviceId, extension: Extension) -> bool;

    /// Creates a voice in the current context. May fail when the backend
    /// runs out of mixing resources; the caller treats the first failure as
    /// the pool capacity.
    fn create_voice(&self) -> Result<VoiceId, BackendError>;
    fn delete_voice(&self, voice: VoiceId);
    fn play_voice(&self, voice: VoiceId);
    fn stop_voice(&self, voice: VoiceId);
    fn voice_state(&self, voice: VoiceId) -> VoiceState;
    /// Raw playback offset in bytes. For streaming voices this is relative
    /// to the start of the current chunk queue.
    fn voice_byte_offset(&self, voice: VoiceId) -> usize;

    /// Hands a voice its entire data block at once (resident playback).
    fn attach_resident(&self, voice: VoiceId, data: &[u8], format: &PcmFormat);
    /// Clears resident data and any queued chunks from a voice.
    fn detach(&self, voice: VoiceId);
    /// Loop flag for resident playback. Streaming voices loop by refeeding.
    fn set_voice_looping(&self, voice: VoiceId, looping: bool);

    fn queue_chunk(&self, voice: VoiceId, data: &[u8], format: &PcmFormat);
    fn unqueue_chunks(&self, voice: VoiceId, count: usize);
    fn queued_chunks(&self, voice: VoiceId) -> usize;
    fn processed_chunks(&self, voice: VoiceId) -> usize;

    fn set_voice_position(&self, voice: VoiceId, position: Vec3);
    fn set_voice_velocity(&self, voice: VoiceId, velocity: Vec3);
    fn set_voice_cone_angles(&self, voice: VoiceId, inside: u32, outside: u32);
    fn set_voice_cone_orientation(&self, voice: VoiceId, direction: Vec3);
    /// Gain applied outside the voice's sound cone, in `[0, 1]`.
    fn set_voice_cone_outside_volume(&self, voice: VoiceId, gain: f32);
    fn set_voice_distances(&self, voice: VoiceId, min: f32, max: f32);
    fn set_voice_rolloff(&self, voice: VoiceId, rolloff: f32);
    /// Positions the voice relative to the listener instead of world space.
    fn set_voice_relative(&self, voice: VoiceId, relative: bool);

    fn set_listener_position(&self, position: Vec3);
    fn set_listener_velocity(&self, velocity: Vec3);
    fn set_listener_orientation(&self, front: Vec3, top: Vec3);
    fn set_distance_factor(&self, factor: f32);
    fn set_doppler_factor(&self, factor: f32);
    fn set_reverb(&self, preset: ReverbPreset);

    /// Halts parameter evaluation without stopping transport, so a batch of
    /// parameter writes lands atomically at the matching
    /// [`process_updates`](AudioBackend::process_updates).
    fn suspend_updates(&self);
    fn process_updates(&self);
}

/// Backend that never opens a device. Used where no audio stack is
/// available; sessions opened against it fail with `NoDriver`.
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn open_device(&self, _identity: &str) -> Result<DeviceId, BackendError> {
        Err(BackendError("no audio device available".into()))
    }

    fn close_device(&self, _device: DeviceId) {}

    fn create_context(&self, _device: DeviceId) -> Result<ContextId, BackendError> {
        Err(BackendError("no audio device available".into()))
    }

    fn destroy_context(&self, _context: ContextId) {}

    fn current_context(&self) -> Option<ContextId> {
        None
    }

    fn make_current(&self, _context: Option<ContextId>) {}

    fn has_extension(&self, _device: DeviceId, _extension: Extension) -> bool {
        false
    }

    fn create_voice(&self) -> Result<VoiceId, BackendError> {
        Err(BackendError("no audio device available".into()))
    }

    fn delete_voice(&self, _voice: VoiceId) {}
    fn play_voice(&self, _voice: VoiceId) {}
    fn stop_voice(&self, _voice: VoiceId) {}

    fn voice_state(&self, _voice: VoiceId) -> VoiceState {
        VoiceState::Initial
    }

    fn voice_byte_offset(&self, _voice: VoiceId) -> usize {
        0
    }

    fn attach_resident(&self, _voice: VoiceId, _data: &[u8], _format: &PcmFormat) {}
    fn detach(&self, _voice: VoiceId) {}
    fn set_voice_looping(&self, _voice: VoiceId, _looping: bool) {}
    fn queue_chunk(&self, _voice: VoiceId, _data: &[u8], _format: &PcmFormat) {}
    fn unqueue_chunks(&self, _voice: VoiceId, _count: usize) {}

    fn queued_chunks(&self, _voice: VoiceId) -> usize {
        0
    }

    fn processed_chunks(&self, _voice: VoiceId) -> usize {
        0
    }

    fn set_voice_position(&self, _voice: VoiceId, _position: Vec3) {}
    fn set_voice_velocity(&self, _voice: VoiceId, _velocity: Vec3) {}
    fn set_voice_cone_angles(&self, _voice: VoiceId, _inside: u32, _outside: u32) {}
    fn set_voice_cone_orientation(&self, _voice: VoiceId, _direction: Vec3) {}
    fn set_voice_cone_outside_volume(&self, _voice: VoiceId, _gain: f32) {}
    fn set_voice_distances(&self, _voice: VoiceId, _min: f32, _max: f32) {}
    fn set_voice_rolloff(&self, _voice: VoiceId, _rolloff: f32) {}
    fn set_voice_relative(&self, _voice: VoiceId, _relative: bool) {}
    fn set_listener_position(&self, _position: Vec3) {}
    fn set_listener_velocity(&self, _velocity: Vec3) {}
    fn set_listener_orientation(&self, _front: Vec3, _top: Vec3) {}
    fn set_distance_factor(&self, _factor: f32) {}
    fn set_doppler_factor(&self, _factor: f32) {}
    fn set_reverb(&self, _preset: ReverbPreset) {}
    fn suspend_updates(&self) {}
    fn process_updates(&self) {}
}
