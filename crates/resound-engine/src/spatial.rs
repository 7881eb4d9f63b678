//! Listener and per-voice 3D parameter state.
//!
//! Both sides keep one snapshot that doubles as current state and pending
//! state: immediate-mode setters write the snapshot and apply to the backend
//! right away; deferred-mode setters write the snapshot and raise a dirty
//! bit, leaving the backend untouched until the session's commit swaps the
//! mask to zero and applies exactly the flagged fields.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use glam::Vec3;

use crate::backend::{AudioBackend, ReverbPreset, VoiceId};
use crate::error::EngineError;

/// Reference speed of sound in meters per second, scaled by the distance
/// factor to convert the client's world units.
const SPEED_OF_SOUND: f32 = 343.3;

const FACTOR_MIN: f32 = 0.0;
const FACTOR_MAX: f32 = 10.0;

bitflags! {
    /// Dirty bits for deferred listener fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ListenerDirty: u32 {
        const POSITION = 1 << 0;
        const VELOCITY = 1 << 1;
        const ORIENTATION = 1 << 2;
        const DISTANCE_FACTOR = 1 << 3;
        const ROLLOFF_FACTOR = 1 << 4;
        const DOPPLER_FACTOR = 1 << 5;
        const EFFECT = 1 << 6;
    }
}

bitflags! {
    /// Dirty bits for deferred per-voice fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct VoiceDirty: u32 {
        const POSITION = 1 << 0;
        const VELOCITY = 1 << 1;
        const CONE_ANGLES = 1 << 2;
        const CONE_ORIENTATION = 1 << 3;
        const CONE_OUTSIDE_VOLUME = 1 << 4;
        const MIN_DISTANCE = 1 << 5;
        const MAX_DISTANCE = 1 << 6;
        const MODE = 1 << 7;
    }
}

/// Atomic dirty mask with swap-to-zero read-and-clear.
///
/// Setters may re-dirty a field immediately after a commit's swap; the next
/// commit picks it up. Last writer wins for fields not yet committed.
#[derive(Default)]
pub(crate) struct DirtyMask(AtomicU32);

impl DirtyMask {
    pub(crate) fn mark(&self, bits: u32) {
        self.0.fetch_or(bits, Ordering::AcqRel);
    }

    /// Returns the raised bits and clears them in one atomic step.
    pub(crate) fn take(&self) -> u32 {
        self.0.swap(0, Ordering::AcqRel)
    }
}

/// Spatialization mode of a buffer's voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode3d {
    /// No spatial processing: the voice is parked at the listener origin
    /// with rolloff zero.
    Disabled,
    /// World-space spatialization.
    #[default]
    Normal,
    /// Parameters are interpreted relative to the listener.
    HeadRelative,
}

/// Full 3D parameter block of one buffer's voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice3dParams {
    pub position: Vec3,
    pub velocity: Vec3,
    pub cone_inside_angle: u32,
    pub cone_outside_angle: u32,
    pub cone_orientation: Vec3,
    /// Gain outside the outer cone, in `[0, 1]`.
    pub cone_outside_volume: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub mode: Mode3d,
}

impl Default for Voice3dParams {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            cone_inside_angle: 360,
            cone_outside_angle: 360,
            cone_orientation: Vec3::Z,
            cone_outside_volume: 1.0,
            min_distance: 1.0,
            max_distance: 1.0e9,
            mode: Mode3d::Normal,
        }
    }
}

/// One buffer-level 3D parameter write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Buffer3dParam {
    Position(Vec3),
    Velocity(Vec3),
    ConeAngles { inside: u32, outside: u32 },
    ConeOrientation(Vec3),
    ConeOutsideVolume(f32),
    MinDistance(f32),
    MaxDistance(f32),
    Mode(Mode3d),
}

impl Buffer3dParam {
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        match *self {
            Buffer3dParam::ConeAngles { inside, outside } => {
                if inside > 360 || outside > 360 {
                    return Err(EngineError::InvalidParameter("cone angle above 360"));
                }
            }
            Buffer3dParam::ConeOutsideVolume(gain) => {
                if !(0.0..=1.0).contains(&gain) {
                    return Err(EngineError::InvalidParameter("cone volume outside [0, 1]"));
                }
            }
            Buffer3dParam::MinDistance(distance) | Buffer3dParam::MaxDistance(distance) => {
                if !distance.is_finite() || distance < 0.0 {
                    return Err(EngineError::InvalidParameter("negative distance"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn store(&self, params: &mut Voice3dParams) -> VoiceDirty {
        match *self {
            Buffer3dParam::Position(position) => {
                params.position = position;
                VoiceDirty::POSITION
            }
            Buffer3dParam::Velocity(velocity) => {
                params.velocity = velocity;
                VoiceDirty::VELOCITY
            }
            Buffer3dParam::ConeAngles { inside, outside } => {
                params.cone_inside_angle = inside;
                params.cone_outside_angle = outside;
                VoiceDirty::CONE_ANGLES
            }
            Buffer3dParam::ConeOrientation(direction) => {
                params.cone_orientation = direction;
                VoiceDirty::CONE_ORIENTATION
            }
            Buffer3dParam::ConeOutsideVolume(gain) => {
                params.cone_outside_volume = gain;
                VoiceDirty::CONE_OUTSIDE_VOLUME
            }
            Buffer3dParam::MinDistance(distance) => {
                params.min_distance = distance;
                VoiceDirty::MIN_DISTANCE
            }
            Buffer3dParam::MaxDistance(distance) => {
                params.max_distance = distance;
                VoiceDirty::MAX_DISTANCE
            }
            Buffer3dParam::Mode(mode) => {
                params.mode = mode;
                VoiceDirty::MODE
            }
        }
    }
}

/// Applies the flagged fields of a voice parameter block to the backend.
///
/// A mode change re-derives the fields the mode overrides: `Disabled` parks
/// the voice listener-relative at the origin with rolloff zero, the other
/// modes restore world/relative placement and the listener's rolloff.
pub(crate) fn apply_voice_params(
    backend: &dyn AudioBackend,
    voice: VoiceId,
    params: &Voice3dParams,
    dirty: VoiceDirty,
    listener_rolloff: f32,
) {
    if dirty.contains(VoiceDirty::MODE) {
        match params.mode {
            Mode3d::Disabled => {
                backend.set_voice_relative(voice, true);
                backend.set_voice_position(voice, Vec3::ZERO);
                backend.set_voice_velocity(voice, Vec3::ZERO);
                backend.set_voice_rolloff(voice, 0.0);
            }
            Mode3d::Normal => {
                backend.set_voice_relative(voice, false);
                backend.set_voice_position(voice, params.position);
                backend.set_voice_velocity(voice, params.velocity);
                backend.set_voice_rolloff(voice, listener_rolloff);
            }
            Mode3d::HeadRelative => {
                backend.set_voice_relative(voice, true);
                backend.set_voice_position(voice, params.position);
                backend.set_voice_velocity(voice, params.velocity);
                backend.set_voice_rolloff(voice, listener_rolloff);
            }
        }
    }
    if params.mode != Mode3d::Disabled {
        if dirty.contains(VoiceDirty::POSITION) && !dirty.contains(VoiceDirty::MODE) {
            backend.set_voice_position(voice, params.position);
        }
        if dirty.contains(VoiceDirty::VELOCITY) && !dirty.contains(VoiceDirty::MODE) {
            backend.set_voice_velocity(voice, params.velocity);
        }
    }
    if dirty.contains(VoiceDirty::CONE_ANGLES) {
        backend.set_voice_cone_angles(voice, params.cone_inside_angle, params.cone_outside_angle);
    }
    if dirty.contains(VoiceDirty::CONE_ORIENTATION) {
        backend.set_voice_cone_orientation(voice, params.cone_orientation);
    }
    if dirty.contains(VoiceDirty::CONE_OUTSIDE_VOLUME) {
        backend.set_voice_cone_outside_volume(voice, params.cone_outside_volume);
    }
    if dirty.contains(VoiceDirty::MIN_DISTANCE) || dirty.contains(VoiceDirty::MAX_DISTANCE) {
        backend.set_voice_distances(voice, params.min_distance, params.max_distance);
    }
}

/// Listener parameter block for one device session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerParams {
    pub position: Vec3,
    pub velocity: Vec3,
    pub front: Vec3,
    pub top: Vec3,
    pub distance_factor: f32,
    pub rolloff_factor: f32,
    pub doppler_factor: f32,
    pub reverb: ReverbPreset,
}

impl Default for ListenerParams {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            front: Vec3::Z,
            top: Vec3::Y,
            distance_factor: 1.0,
            rolloff_factor: 1.0,
            doppler_factor: 1.0,
            reverb: ReverbPreset::Generic,
        }
    }
}

/// One listener-level parameter write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ListenerParam {
    Position(Vec3),
    Velocity(Vec3),
    Orientation { front: Vec3, top: Vec3 },
    DistanceFactor(f32),
    RolloffFactor(f32),
    DopplerFactor(f32),
    Reverb(ReverbPreset),
}

impl ListenerParam {
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        match *self {
            ListenerParam::DistanceFactor(factor) => {
                if !factor.is_finite() || factor <= 0.0 {
                    return Err(EngineError::InvalidParameter("non-positive distance factor"));
                }
            }
            ListenerParam::RolloffFactor(factor) | ListenerParam::DopplerFactor(factor) => {
                if !factor.is_finite() || !(FACTOR_MIN..=FACTOR_MAX).contains(&factor) {
                    return Err(EngineError::InvalidParameter("factor out of range"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn store(&self, params: &mut ListenerParams) -> ListenerDirty {
        match *self {
            ListenerParam::Position(position) => {
                params.position = position;
                ListenerDirty::POSITION
            }
            ListenerParam::Velocity(velocity) => {
                params.velocity = velocity;
                ListenerDirty::VELOCITY
            }
            ListenerParam::Orientation { front, top } => {
                params.front = front;
                params.top = top;
                ListenerDirty::ORIENTATION
            }
            ListenerParam::DistanceFactor(factor) => {
                params.distance_factor = factor;
                ListenerDirty::DISTANCE_FACTOR
            }
            ListenerParam::RolloffFactor(factor) => {
                params.rolloff_factor = factor;
                ListenerDirty::ROLLOFF_FACTOR
            }
            ListenerParam::DopplerFactor(factor) => {
                params.doppler_factor = factor;
                ListenerDirty::DOPPLER_FACTOR
            }
            ListenerParam::Reverb(preset) => {
                params.reverb = preset;
                ListenerDirty::EFFECT
            }
        }
    }
}

/// Listener state plus its dirty mask.
#[derive(Default)]
pub(crate) struct ListenerState {
    pub(crate) params: ListenerParams,
    pub(crate) dirty: DirtyMask,
}

/// Applies flagged listener fields to the backend.
///
/// The rolloff factor has no listener-level analogue on the backend and is
/// distributed per voice by the caller, which knows the allocated set; this
/// routine covers everything listener-global. The distance factor converts
/// world units by rescaling the backend's speed of sound.
pub(crate) fn apply_listener_params(
    backend: &dyn AudioBackend,
    params: &ListenerParams,
    dirty: ListenerDirty,
    aux_effects: bool,
) {
    if dirty.contains(ListenerDirty::POSITION) {
        backend.set_listener_position(params.position);
    }
    if dirty.contains(ListenerDirty::VELOCITY) {
        backend.set_listener_velocity(params.velocity);
    }
    if dirty.contains(ListenerDirty::ORIENTATION) {
        backend.set_listener_orientation(params.front, params.top);
    }
    if dirty.contains(ListenerDirty::DISTANCE_FACTOR) {
        backend.set_distance_factor(SPEED_OF_SOUND / params.distance_factor);
    }
    if dirty.contains(ListenerDirty::DOPPLER_FACTOR) {
        backend.set_doppler_factor(params.doppler_factor);
    }
    if dirty.contains(ListenerDirty::EFFECT) {
        if aux_effects {
            backend.set_reverb(params.reverb);
        } else {
            tracing::warn!("reverb change ignored: no auxiliary effect slots");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_in_one_step() {
        let mask = DirtyMask::default();
        mask.mark(ListenerDirty::POSITION.bits());
        mask.mark(ListenerDirty::DOPPLER_FACTOR.bits());
        assert_eq!(
            mask.take(),
            (ListenerDirty::POSITION | ListenerDirty::DOPPLER_FACTOR).bits()
        );
        assert_eq!(mask.take(), 0);
    }

    #[test]
    fn factor_validation() {
        assert!(ListenerParam::RolloffFactor(0.0).validate().is_ok());
        assert!(ListenerParam::RolloffFactor(10.0).validate().is_ok());
        assert!(ListenerParam::RolloffFactor(10.5).validate().is_err());
        assert!(ListenerParam::RolloffFactor(-0.1).validate().is_err());
        assert!(ListenerParam::DistanceFactor(0.0).validate().is_err());
        assert!(ListenerParam::DistanceFactor(f32::NAN).validate().is_err());
        assert!(ListenerParam::DopplerFactor(2.0).validate().is_ok());
    }

    #[test]
    fn store_raises_matching_bit() {
        let mut params = Voice3dParams::default();
        let bit = Buffer3dParam::MinDistance(2.0).store(&mut params);
        assert_eq!(bit, VoiceDirty::MIN_DISTANCE);
        assert_eq!(params.min_distance, 2.0);

        let bit = Buffer3dParam::Mode(Mode3d::HeadRelative).store(&mut params);
        assert_eq!(bit, VoiceDirty::MODE);
        assert_eq!(params.mode, Mode3d::HeadRelative);
    }
}
