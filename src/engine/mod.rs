//! Processing Engine Module
//!
//! Caller-owned sample memory and channel contexts:
//! - Buffer pool and block views
//! - Channels and the channel registry
//! - I/Q recording file I/O

pub mod buffer;
pub mod channel;
pub mod io;

pub use buffer::{interleave, magnitudes, BlockIo, BufferId, BufferPool, StageBuffers};
pub use channel::{Channel, ChannelRegistry};
pub use io::{generate_iq_tone, read_iq_wav, write_wav, IqRecording};
