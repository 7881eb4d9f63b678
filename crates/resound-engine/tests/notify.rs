use std::sync::Arc;
use std::time::Duration;

use resound_engine::backend::mock::MockBackend;
use resound_engine::{
    BufferCaps, BufferDesc, BufferMode, EngineError, NotifyPosition, PcmFormat, SessionRegistry,
};

const FORMAT: PcmFormat = PcmFormat {
    channels: 1,
    sample_rate: 22_050,
    bits_per_sample: 8,
    block_align: 1,
};

fn notify_desc(length: usize) -> BufferDesc {
    BufferDesc {
        format: FORMAT,
        length,
        mode: BufferMode::Static,
        caps: BufferCaps::CTRL_NOTIFY,
    }
}

#[test]
fn offsets_fire_once_when_crossed() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(notify_desc(1000)).unwrap();
    let at_100 = buffer.register_notification(NotifyPosition::Offset(100)).unwrap();
    let at_500 = buffer.register_notification(NotifyPosition::Offset(500)).unwrap();
    let at_900 = buffer.register_notification(NotifyPosition::Offset(900)).unwrap();
    buffer.play(false).unwrap();

    let voice = backend.voice_ids()[0];
    backend.advance(voice, 600);
    session.tick();
    assert_eq!(at_100.take_count(), 1);
    assert_eq!(at_500.take_count(), 1);
    assert_eq!(at_900.take_count(), 0);

    // No motion, no new signals.
    session.tick();
    assert_eq!(at_100.take_count(), 0);
    assert_eq!(at_500.take_count(), 0);
}

#[test]
fn end_of_data_fires_remaining_offsets_and_stop() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(notify_desc(1000)).unwrap();
    let at_900 = buffer.register_notification(NotifyPosition::Offset(900)).unwrap();
    let stop = buffer.register_notification(NotifyPosition::Stop).unwrap();
    buffer.play(false).unwrap();

    let voice = backend.voice_ids()[0];
    backend.advance(voice, 1000);
    session.tick();
    assert_eq!(at_900.take_count(), 1);
    assert_eq!(stop.take_count(), 1);
    assert!(!buffer.is_playing());

    // The sweep released the voice and untracked the buffer.
    session.tick();
    assert_eq!(stop.take_count(), 0);
}

#[test]
fn loop_wraparound_crosses_tail_and_head_offsets() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(notify_desc(1000)).unwrap();
    let head = buffer.register_notification(NotifyPosition::Offset(10)).unwrap();
    let middle = buffer.register_notification(NotifyPosition::Offset(500)).unwrap();
    let tail = buffer.register_notification(NotifyPosition::Offset(999)).unwrap();
    buffer.play(true).unwrap();

    let voice = backend.voice_ids()[0];
    backend.advance(voice, 900);
    session.tick();
    assert_eq!(head.take_count(), 1);
    assert_eq!(middle.take_count(), 1);
    assert_eq!(tail.take_count(), 0);

    // 900 -> 50 through the end of the loop.
    backend.advance(voice, 150);
    session.tick();
    assert_eq!(tail.take_count(), 1);
    assert_eq!(head.take_count(), 1);
    assert_eq!(middle.take_count(), 0);
    assert!(buffer.is_playing());
}

#[test]
fn explicit_stop_signals_the_stop_sentinel_synchronously() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend);
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(notify_desc(1000)).unwrap();
    let stop = buffer.register_notification(NotifyPosition::Stop).unwrap();
    buffer.play(true).unwrap();

    // No tick in between.
    buffer.stop().unwrap();
    assert!(stop.wait_timeout(Duration::from_millis(0)));

    // Stopping a stopped buffer does not fire again.
    buffer.stop().unwrap();
    assert_eq!(stop.take_count(), 0);
}

#[test]
fn registration_is_locked_while_playing() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend);
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(notify_desc(1000)).unwrap();
    buffer.play(true).unwrap();
    assert!(matches!(
        buffer.register_notification(NotifyPosition::Offset(10)),
        Err(EngineError::InvalidParameter(_))
    ));
    assert!(matches!(
        buffer.clear_notifications(),
        Err(EngineError::InvalidParameter(_))
    ));

    buffer.stop().unwrap();
    buffer.register_notification(NotifyPosition::Offset(10)).unwrap();
    buffer.clear_notifications().unwrap();
}

#[test]
fn notification_offsets_must_lie_inside_the_buffer() {
    let backend = Arc::new(MockBackend::new());
    let registry = SessionRegistry::new(backend);
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(notify_desc(1000)).unwrap();
    assert!(buffer.register_notification(NotifyPosition::Offset(999)).is_ok());
    assert!(matches!(
        buffer.register_notification(NotifyPosition::Offset(1000)),
        Err(EngineError::InvalidParameter(_))
    ));
}

#[test]
fn notify_control_is_required() {
    let backend = Arc::new(MockBackend::new());
    let registry = SessionRegistry::new(backend);
    let session = registry.open_session("default").unwrap();

    let mut desc = notify_desc(1000);
    desc.caps = BufferCaps::empty();
    let buffer = session.create_buffer(desc).unwrap();
    assert_eq!(
        buffer
            .register_notification(NotifyPosition::Stop)
            .unwrap_err(),
        EngineError::ControlUnavailable
    );
}

#[test]
fn signals_wake_waiting_threads() {
    let backend = Arc::new(MockBackend::new().with_voice_limit(1));
    let registry = SessionRegistry::new(backend.clone());
    let session = registry.open_session("default").unwrap();

    let buffer = session.create_buffer(notify_desc(1000)).unwrap();
    let at_100 = buffer.register_notification(NotifyPosition::Offset(100)).unwrap();
    buffer.play(false).unwrap();

    let waiter = {
        let at_100 = at_100.clone();
        std::thread::spawn(move || at_100.wait_timeout(Duration::from_secs(5)))
    };
    backend.advance(backend.voice_ids()[0], 200);
    session.tick();
    assert!(waiter.join().unwrap());
}
