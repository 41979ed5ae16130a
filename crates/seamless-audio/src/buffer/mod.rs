//! Decoded chunk buffers and the per-stream slot cache holding them.

pub mod cache;
pub mod decoded;

pub use cache::{BufferCache, Slot};
pub use decoded::DecodedBuffer;
