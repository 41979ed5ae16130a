//! Core domain types for seamless.

pub mod catalog;
pub mod chunk;

pub use catalog::{ChunkCatalog, StreamDetails};
pub use chunk::ChunkDescriptor;
