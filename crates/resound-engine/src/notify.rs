//! Playback position and stop notifications.
//!
//! Buffers with the notify control register offsets (or the stop sentinel)
//! before playing; the session tick sweeps every tracked buffer, compares
//! the current play position against the previous sweep's, and signals the
//! events whose offsets were crossed. Crossing accounts for loop wraparound,
//! and a buffer that stopped since the last sweep fires its stop sentinel
//! exactly once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::backend::{AudioBackend, VoiceState};
use crate::buffer::{PlayState, fire_stop_notifies};
use crate::session::SessionState;

/// Where a notification triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyPosition {
    /// Byte offset from the start of the buffer, below its length.
    Offset(usize),
    /// Fires when the buffer stops, whether explicitly or by reaching the
    /// end of non-looping data.
    Stop,
}

/// Signalable event handed out by buffer notification registration.
///
/// Signals accumulate: each [`signal`](Self::signal) adds one, each
/// successful wait consumes one, so a waiter never misses a trigger that
/// happened before it started waiting.
#[derive(Debug, Clone, Default)]
pub struct NotifyEvent {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl NotifyEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn signal(&self) {
        let (count, condvar) = &*self.inner;
        *count.lock() += 1;
        condvar.notify_all();
    }

    /// Consumes and returns every pending signal without blocking.
    pub fn take_count(&self) -> usize {
        std::mem::take(&mut *self.inner.0.lock())
    }

    /// Waits until one signal is available and consumes it. Returns `false`
    /// on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (count, condvar) = &*self.inner;
        let mut pending = count.lock();
        if condvar
            .wait_while_for(&mut pending, |pending| *pending == 0, timeout)
            .timed_out()
        {
            return false;
        }
        *pending -= 1;
        true
    }
}

/// Whether playback moving from `last` to `current` crossed `offset`.
///
/// `current < last` means the position wrapped around the end of the
/// buffer, so the crossed range is the union of the tail and the head.
/// Equal positions cross nothing.
pub(crate) fn crossed(last: usize, current: usize, offset: usize) -> bool {
    if current > last {
        last <= offset && offset < current
    } else if current < last {
        offset < current || offset >= last
    } else {
        false
    }
}

/// One notification sweep over the session's tracked buffers.
///
/// Runs with the session state lock and a context guard held. Buffers that
/// stopped are finalized here: stop sentinels fire, the voice goes back to
/// the pool, and the entry leaves the tracking list by swap-with-last
/// without advancing the index.
pub(crate) fn run_notifications(state: &mut SessionState, backend: &dyn AudioBackend) {
    let mut index = 0;
    while index < state.active.len() {
        let Some(buffer) = state.active[index].upgrade() else {
            state.active.swap_remove(index);
            continue;
        };
        let mut bstate = buffer.state.lock();
        let len = buffer.length;
        let (playing, looping) = match bstate.play {
            PlayState::Playing { looping } => (true, looping),
            PlayState::Stopped => (false, false),
        };

        let mut still_playing = playing;
        let curpos = match bstate.slot {
            None => {
                still_playing = false;
                len
            }
            Some(slot) => {
                let voice = state.voices[slot];
                let vstate = backend.voice_state(voice);
                let mut pos = if bstate.seg_size == 0 {
                    if matches!(vstate, VoiceState::Playing | VoiceState::Paused) {
                        backend.voice_byte_offset(voice)
                    } else {
                        len
                    }
                } else if vstate == VoiceState::Playing {
                    backend.voice_byte_offset(voice) + bstate.queue_base
                } else {
                    bstate.seg_size * backend.queued_chunks(voice) + bstate.queue_base
                };
                if pos >= len {
                    if looping {
                        pos %= len;
                    } else {
                        pos = len;
                        still_playing = false;
                    }
                }
                pos
            }
        };

        if curpos != bstate.last_pos {
            for notify in &bstate.notifies {
                if let NotifyPosition::Offset(offset) = notify.position {
                    if crossed(bstate.last_pos, curpos, offset) {
                        notify.event.signal();
                    }
                }
            }
            bstate.last_pos = curpos;
        }

        if !still_playing {
            tracing::trace!(position = curpos, "tracked buffer stopped");
            fire_stop_notifies(&bstate);
            bstate.play = PlayState::Stopped;
            if let Some(slot) = bstate.slot.take() {
                state.release_slot(backend, slot);
            }
            bstate.cursor = 0;
            bstate.queue_base = 0;
            bstate.seg_size = 0;
            bstate.last_pos = 0;
            drop(bstate);
            drop(buffer);
            state.active.swap_remove(index);
            continue;
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_motion_crosses_interior_offsets() {
        // Moving 50 -> 600 crosses 100 and 500 but not 600 or 999.
        assert!(crossed(50, 600, 100));
        assert!(crossed(50, 600, 500));
        assert!(crossed(50, 600, 50));
        assert!(!crossed(50, 600, 600));
        assert!(!crossed(50, 600, 999));
        assert!(!crossed(50, 600, 0));
    }

    #[test]
    fn wraparound_crosses_tail_and_head() {
        // Moving 900 -> 50 in a 1000-byte loop crosses 999 and 10, but not
        // offsets in the untouched middle.
        assert!(crossed(900, 50, 999));
        assert!(crossed(900, 50, 900));
        assert!(crossed(900, 50, 10));
        assert!(!crossed(900, 50, 100));
        assert!(!crossed(900, 50, 500));
        assert!(!crossed(900, 50, 50));
    }

    #[test]
    fn no_motion_crosses_nothing() {
        assert!(!crossed(300, 300, 300));
        assert!(!crossed(300, 300, 0));
    }

    #[test]
    fn event_accumulates_and_consumes_signals() {
        let event = NotifyEvent::new();
        assert_eq!(event.take_count(), 0);
        assert!(!event.wait_timeout(Duration::from_millis(1)));

        event.signal();
        event.signal();
        assert!(event.wait_timeout(Duration::from_millis(1)));
        assert_eq!(event.take_count(), 1);
    }

    #[test]
    fn signal_wakes_a_parked_waiter() {
        let event = NotifyEvent::new();
        let waiter = {
            let event = event.clone();
            std::thread::spawn(move || event.wait_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(10));
        event.signal();
        assert!(waiter.join().unwrap());
    }
}
