//! Chunk decoder backed by the chunk server.

use std::future::Future;

use seamless_audio::decode::decode_bytes;
use seamless_audio::{ChunkDecoder, DecodedBuffer};
use seamless_core::{Error, Result};
use tracing::trace;

use crate::client::ChunkClient;

/// Downloads chunk payloads and decodes them off the async runtime.
#[derive(Clone)]
pub struct HttpChunkDecoder {
    client: ChunkClient,
}

impl HttpChunkDecoder {
    pub const fn new(client: ChunkClient) -> Self {
        Self { client }
    }

    pub const fn client(&self) -> &ChunkClient {
        &self.client
    }
}

impl ChunkDecoder for HttpChunkDecoder {
    fn decode(&self, location: &str) -> impl Future<Output = Result<DecodedBuffer>> + Send {
        let client = self.client.clone();
        let location = location.to_string();

        async move {
            let payload = client.fetch_chunk(&location).await?;
            trace!("Fetched {} bytes for {location}", payload.len());

            tokio::task::spawn_blocking(move || decode_bytes(payload, Some(location.as_str())))
                .await
                .map_err(|e| Error::Internal(format!("Decode task failed: {e}")))?
        }
    }
}
