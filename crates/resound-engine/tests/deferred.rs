use std::sync::Arc;

use glam::Vec3;
use resound_engine::backend::Extension;
use resound_engine::backend::mock::{MockBackend, MockEvent};
use resound_engine::{
    Buffer3dParam, BufferCaps, BufferDesc, BufferMode, EngineError, ListenerParam, Mode3d,
    PcmFormat, SessionRegistry,
};

const FORMAT: PcmFormat = PcmFormat {
    channels: 1,
    sample_rate: 22_050,
    bits_per_sample: 8,
    block_align: 1,
};

fn spatial_desc() -> BufferDesc {
    BufferDesc {
        format: FORMAT,
        length: 1000,
        mode: BufferMode::Static,
        caps: BufferCaps::CTRL_3D,
    }
}

#[test]
fn deferred_listener_writes_wait_for_commit() {
    let backend = Arc::new(MockBackend::new());
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();
    backend.clear_events();

    session
        .set_listener_param(ListenerParam::Position(Vec3::new(1.0, 2.0, 3.0)), true)
        .unwrap();
    session
        .set_listener_param(ListenerParam::DopplerFactor(2.0), true)
        .unwrap();
    assert!(backend.events().is_empty());

    // The snapshot reflects the staged values before they land.
    let params = session.listener_params().unwrap();
    assert_eq!(params.position, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(params.doppler_factor, 2.0);

    session.commit_deferred().unwrap();
    let events = backend.events();
    assert_eq!(events.first(), Some(&MockEvent::Suspend));
    assert_eq!(events.last(), Some(&MockEvent::Process));
    assert!(events.contains(&MockEvent::ListenerPosition(Vec3::new(1.0, 2.0, 3.0))));
    assert!(events.contains(&MockEvent::DopplerFactor(2.0)));

    // A second commit has nothing left to apply.
    backend.clear_events();
    session.commit_deferred().unwrap();
    assert_eq!(backend.events(), vec![MockEvent::Suspend, MockEvent::Process]);
}

#[test]
fn restaged_deferred_field_applies_the_last_value_once() {
    let backend = Arc::new(MockBackend::new());
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();
    backend.clear_events();

    // The second write overwrites the first in the staging snapshot.
    session
        .set_listener_param(ListenerParam::Position(Vec3::new(1.0, 0.0, 0.0)), true)
        .unwrap();
    session
        .set_listener_param(ListenerParam::Position(Vec3::new(9.0, 9.0, 9.0)), true)
        .unwrap();
    assert!(backend.events().is_empty());

    session.commit_deferred().unwrap();
    let positions: Vec<_> = backend
        .events()
        .into_iter()
        .filter(|event| matches!(event, MockEvent::ListenerPosition(_)))
        .collect();
    assert_eq!(
        positions,
        vec![MockEvent::ListenerPosition(Vec3::new(9.0, 9.0, 9.0))]
    );
}

#[test]
fn immediate_listener_writes_skip_the_barrier() {
    let backend = Arc::new(MockBackend::new());
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();
    backend.clear_events();

    session
        .set_listener_param(ListenerParam::Velocity(Vec3::X), false)
        .unwrap();
    assert_eq!(backend.events(), vec![MockEvent::ListenerVelocity(Vec3::X)]);
}

#[test]
fn distance_factor_rescales_the_speed_of_sound() {
    let backend = Arc::new(MockBackend::new());
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();
    backend.clear_events();

    session
        .set_listener_param(ListenerParam::DistanceFactor(2.0), false)
        .unwrap();
    let events = backend.events();
    let MockEvent::DistanceFactor(factor) = events[0] else {
        panic!("expected a distance factor event, got {events:?}");
    };
    assert!((factor - 343.3 / 2.0).abs() < 1e-3);
}

#[test]
fn deferred_buffer_params_land_in_one_batch() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(spatial_desc()).unwrap();
    buffer.play(true).unwrap();
    backend.clear_events();

    buffer
        .set_3d_param(Buffer3dParam::Position(Vec3::new(4.0, 0.0, 0.0)), true)
        .unwrap();
    buffer
        .set_3d_param(Buffer3dParam::MinDistance(2.0), true)
        .unwrap();
    session
        .set_listener_param(ListenerParam::Position(Vec3::Y), true)
        .unwrap();
    assert!(backend.events().is_empty());

    session.commit_deferred().unwrap();
    let events = backend.events();
    let voice = backend.voice_ids()[0];
    assert_eq!(events.first(), Some(&MockEvent::Suspend));
    assert_eq!(events.last(), Some(&MockEvent::Process));
    assert!(events.contains(&MockEvent::ListenerPosition(Vec3::Y)));
    assert!(events.contains(&MockEvent::VoicePosition(voice, Vec3::new(4.0, 0.0, 0.0))));
    assert!(events.contains(&MockEvent::VoiceDistances(voice, 2.0, 1.0e9)));
}

#[test]
fn stopped_buffers_apply_staged_params_at_play() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(spatial_desc()).unwrap();
    buffer
        .set_3d_param(Buffer3dParam::Position(Vec3::Z), true)
        .unwrap();
    backend.clear_events();

    // Without a voice there is nothing to flag during the commit.
    session.commit_deferred().unwrap();
    assert_eq!(backend.events(), vec![MockEvent::Suspend, MockEvent::Process]);

    buffer.play(false).unwrap();
    let voice = backend.voice_ids()[0];
    assert!(backend
        .events()
        .contains(&MockEvent::VoicePosition(voice, Vec3::Z)));
}

#[test]
fn immediate_buffer_params_reach_a_playing_voice() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(spatial_desc()).unwrap();
    buffer.play(true).unwrap();
    backend.clear_events();

    buffer
        .set_3d_param(Buffer3dParam::ConeOutsideVolume(0.5), false)
        .unwrap();
    let voice = backend.voice_ids()[0];
    assert_eq!(
        backend.events(),
        vec![MockEvent::VoiceConeOutsideVolume(voice, 0.5)]
    );
}

#[test]
fn disabling_spatialization_parks_the_voice() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(spatial_desc()).unwrap();
    buffer.play(true).unwrap();
    backend.clear_events();

    buffer
        .set_3d_param(Buffer3dParam::Mode(Mode3d::Disabled), false)
        .unwrap();
    let voice = backend.voice_ids()[0];
    let events = backend.events();
    assert!(events.contains(&MockEvent::VoiceRelative(voice, true)));
    assert!(events.contains(&MockEvent::VoicePosition(voice, Vec3::ZERO)));
    assert!(events.contains(&MockEvent::VoiceRolloff(voice, 0.0)));
}

#[test]
fn rolloff_changes_reach_only_spatialized_voices() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(2));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();

    let spatial = session.create_buffer(spatial_desc()).unwrap();
    let mut flat_desc = spatial_desc();
    flat_desc.caps = BufferCaps::empty();
    let flat = session.create_buffer(flat_desc).unwrap();
    spatial.play(true).unwrap();
    flat.play(true).unwrap();
    backend.clear_events();

    session
        .set_listener_param(ListenerParam::RolloffFactor(3.0), false)
        .unwrap();
    let voices = backend.voice_ids();
    let events = backend.events();
    // First play took the first voice.
    assert!(events.contains(&MockEvent::VoiceRolloff(voices[0], 3.0)));
    assert!(!events.contains(&MockEvent::VoiceRolloff(voices[1], 3.0)));
}

#[test]
fn reverb_needs_auxiliary_effect_slots() {
    let backend = Arc::new(MockBackend::new().without_extension(Extension::AuxEffectSlots));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();
    backend.clear_events();

    use resound_engine::backend::ReverbPreset;
    session
        .set_listener_param(ListenerParam::Reverb(ReverbPreset::Cave), false)
        .unwrap();
    assert!(backend.events().is_empty());

    let supported = Arc::new(MockBackend::new());
    let registry = SessionRegistry::new(supported.clone());
    let session = registry.open_session("default").unwrap();
    supported.clear_events();
    session
        .set_listener_param(ListenerParam::Reverb(ReverbPreset::Cave), false)
        .unwrap();
    assert_eq!(supported.events(), vec![MockEvent::Reverb(ReverbPreset::Cave)]);
}

#[test]
fn out_of_range_parameters_are_rejected() {
    let backend = Arc::new(MockBackend::new());
    let registry = SessionRegistry::new(backend);
    let session = registry.open_session("default").unwrap();

    assert!(matches!(
        session.set_listener_param(ListenerParam::RolloffFactor(11.0), false),
        Err(EngineError::InvalidParameter(_))
    ));
    assert!(matches!(
        session.set_listener_param(ListenerParam::DistanceFactor(0.0), true),
        Err(EngineError::InvalidParameter(_))
    ));

    let buffer = session.create_buffer(spatial_desc()).unwrap();
    assert!(matches!(
        buffer.set_3d_param(Buffer3dParam::ConeOutsideVolume(1.5), false),
        Err(EngineError::InvalidParameter(_))
    ));
    assert!(matches!(
        buffer.set_3d_param(Buffer3dParam::ConeAngles { inside: 400, outside: 360 }, true),
        Err(EngineError::InvalidParameter(_))
    ));
}

#[test]
fn spatial_control_is_required() {
    let backend = Arc::new(MockBackend::new());
    let registry = SessionRegistry::new(backend);
    let session = registry.open_session("default").unwrap();

    let mut desc = spatial_desc();
    desc.caps = BufferCaps::empty();
    let buffer = session.create_buffer(desc).unwrap();
    assert_eq!(
        buffer
            .set_3d_param(Buffer3dParam::Position(Vec3::X), false)
            .unwrap_err(),
        EngineError::ControlUnavailable
    );
}
