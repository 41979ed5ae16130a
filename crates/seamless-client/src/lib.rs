//! # seamless-client
//!
//! HTTP client for the chunk server: fetches the stream details document and
//! chunk payloads, and decodes payloads for the playback engine.

pub mod client;
pub mod decoder;

pub use client::ChunkClient;
pub use decoder::HttpChunkDecoder;
