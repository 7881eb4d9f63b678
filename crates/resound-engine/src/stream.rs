//! Streaming queue feeder.
//!
//! Streaming buffers keep at most [`QUEUE_DEPTH`] chunks of roughly
//! [`CHUNK_SIZE`] bytes queued on their voice. Each feed pass retires the
//! chunks the voice has finished, advances the logical queue base, and
//! refills the queue from the buffer data: wrapping around for looping
//! buffers, padding the final chunk with silence otherwise.

use std::sync::Weak;

use crate::backend::{AudioBackend, VoiceId, VoiceState};
use crate::buffer::{BufferState, PlayState};
use crate::format::PcmFormat;
use crate::session::SessionState;

/// Nominal chunk size in bytes, before frame alignment.
pub(crate) const CHUNK_SIZE: usize = 2048;
/// Chunks kept queued per streaming voice.
pub(crate) const QUEUE_DEPTH: usize = 4;

/// Chunk size for `format`: [`CHUNK_SIZE`] rounded down to a whole number
/// of sample frames.
pub(crate) fn chunk_size(format: &PcmFormat) -> usize {
    let align = format.block_align as usize;
    (CHUNK_SIZE / align).max(1) * align
}

/// Feeds every allocated streaming voice that is logically playing. Runs
/// with the session state lock and a context guard held.
pub(crate) fn run_feeder(state: &mut SessionState, backend: &dyn AudioBackend) {
    let slots: Vec<usize> = state.pool.allocated().collect();
    for slot in slots {
        let Some(owner) = state.owners[slot].as_ref().and_then(Weak::upgrade) else {
            continue;
        };
        let mut bstate = owner.state.lock();
        if bstate.seg_size == 0 || !matches!(bstate.play, PlayState::Playing { .. }) {
            continue;
        }
        let voice = state.voices[slot];
        feed_voice(backend, voice, &owner.format, &mut bstate, &mut state.scratch);
    }
}

/// One feed pass over a single streaming voice.
///
/// On queue underrun (non-looping data exhausted and every chunk consumed)
/// the buffer is marked stopped with cursor and queue base reset, ready for
/// a replay in place.
pub(crate) fn feed_voice(
    backend: &dyn AudioBackend,
    voice: VoiceId,
    format: &PcmFormat,
    state: &mut BufferState,
    scratch: &mut Vec<u8>,
) {
    let len = state.data.len();
    let seg = state.seg_size;
    let looping = matches!(state.play, PlayState::Playing { looping: true });

    let done = backend.processed_chunks(voice);
    if done > 0 {
        backend.unqueue_chunks(voice, done);
        state.queue_base = (state.queue_base + seg * done) % len;
    }

    let mut queued = backend.queued_chunks(voice);
    while queued < QUEUE_DEPTH {
        let ofs = state.cursor;
        let remaining = len - ofs;
        if seg < remaining {
            backend.queue_chunk(voice, &state.data[ofs..ofs + seg], format);
            state.cursor += seg;
        } else if looping {
            // Chunk spans the end of the data: stitch tail and head (the
            // whole block repeatedly, if shorter than a chunk).
            scratch.clear();
            scratch.extend_from_slice(&state.data[ofs..]);
            let mut need = seg - remaining;
            while need >= len {
                scratch.extend_from_slice(&state.data);
                need -= len;
            }
            scratch.extend_from_slice(&state.data[..need]);
            backend.queue_chunk(voice, scratch, format);
            state.cursor = need;
        } else {
            if remaining == 0 {
                break;
            }
            scratch.clear();
            scratch.extend_from_slice(&state.data[ofs..]);
            scratch.resize(seg, format.silence_byte());
            backend.queue_chunk(voice, scratch, format);
            state.cursor = len;
        }
        queued += 1;
    }

    if queued == 0 {
        // Drained without looping: back to start-of-stream. The voice stays
        // bound; release is an explicit stop, a notification-sweep
        // transition, or a handle drop.
        tracing::trace!("streaming queue drained");
        state.cursor = 0;
        state.queue_base = 0;
        state.play = PlayState::Stopped;
    } else if backend.voice_state(voice) != VoiceState::Playing {
        backend.play_voice(voice);
    }
}
