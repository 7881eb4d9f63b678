//! Resound Engine
//! ==============
//! Legacy-style audio playback engine: shared device sessions hand out a
//! fixed pool of backend voices to logical PCM buffers, which play either
//! resident (whole block attached at once) or streaming (chunk queue kept
//! topped up by a service tick). Buffers support position and stop
//! notifications with loop wraparound, and 3D parameters that can be staged
//! and committed as one atomic batch.

pub mod backend;
pub mod buffer;
pub mod error;
pub mod format;
pub mod notify;
pub mod session;
pub mod spatial;

mod pool;
mod stream;

pub use backend::{AudioBackend, NullBackend};
pub use buffer::{BufferCaps, BufferDesc, BufferHandle, BufferMode};
pub use error::EngineError;
pub use format::PcmFormat;
pub use notify::{NotifyEvent, NotifyPosition};
pub use session::{ExtensionSet, SessionHandle, SessionRegistry, MAX_VOICES};
pub use spatial::{Buffer3dParam, ListenerParam, ListenerParams, Mode3d, Voice3dParams};
