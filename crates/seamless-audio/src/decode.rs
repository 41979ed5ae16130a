//! Chunk payload decoding using symphonia.

use std::io::Cursor;

use bytes::Bytes;
use seamless_core::{Error, Result};
use symphonia::core::{
    audio::{AudioBufferRef, Signal},
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    formats::{FormatOptions, FormatReader},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, error, trace};

use crate::buffer::DecodedBuffer;

/// File extension symphonia should probe first, from a mime type or a chunk
/// location.
pub fn format_hint(hint: &str) -> Option<&'static str> {
    let hint = hint.to_ascii_lowercase();
    let path = hint.split(['?', '#']).next().unwrap_or_default();

    if path.ends_with(".wav") || hint.contains("wav") {
        Some("wav")
    } else if path.ends_with(".flac") || hint.contains("flac") {
        Some("flac")
    } else if path.ends_with(".ogg") || hint.contains("ogg") || hint.contains("vorbis") {
        Some("ogg")
    } else if path.ends_with(".mp3") || hint.contains("mpeg") || hint.contains("mp3") {
        Some("mp3")
    } else if path.ends_with(".m4a") || hint.contains("mp4") || hint.contains("aac") {
        Some("m4a")
    } else {
        None
    }
}

/// Single-shot decoder for one chunk payload.
pub struct ChunkPayloadDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
}

impl ChunkPayloadDecoder {
    /// Probe `data` and open its first audio track.
    #[allow(clippy::needless_pass_by_value)] // Bytes is cheaply cloneable
    pub fn from_bytes(data: Bytes, hint: Option<&str>) -> Result<Self> {
        let cursor = Cursor::new(data.to_vec());
        let mss = MediaSourceStream::new(Box::new(cursor), MediaSourceStreamOptions::default());

        let mut probe_hint = Hint::new();
        if let Some(extension) = hint.and_then(format_hint) {
            probe_hint.with_extension(extension);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&probe_hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::DecodeFailure(format!("Failed to probe format: {e}")))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::DecodeFailure("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(48000);
        #[allow(clippy::cast_possible_truncation)]
        let channels = track.codec_params.channels.map_or(2, |c| c.count() as u16);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::DecodeFailure(format!("Failed to create decoder: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    /// Decode the next packet into interleaved f32 samples.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::DecodeFailure(format!("Failed to read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => return Ok(Some(audio_buffer_to_f32(&decoded))),
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    error!("Decode error (skipping): {e}");
                }
                Err(e) => {
                    return Err(Error::DecodeFailure(format!("Decode failed: {e}")));
                }
            }
        }
    }

    /// Decode every remaining packet into one buffer.
    pub fn decode_all(mut self) -> Result<DecodedBuffer> {
        let mut samples = Vec::new();
        let mut packets = 0usize;
        while let Some(chunk) = self.decode_next()? {
            samples.extend_from_slice(&chunk);
            packets += 1;
        }

        if samples.is_empty() {
            return Err(Error::DecodeFailure("Payload decoded to no samples".to_string()));
        }

        trace!("Decoded {packets} packets");
        Ok(DecodedBuffer::new(samples, self.sample_rate, self.channels))
    }
}

/// Decode a complete chunk payload.
pub fn decode_bytes(data: Bytes, hint: Option<&str>) -> Result<DecodedBuffer> {
    let size = data.len();
    let buffer = ChunkPayloadDecoder::from_bytes(data, hint)?.decode_all()?;
    debug!(
        "Decoded {size} bytes into {:.3}s at {}Hz, {} channels",
        buffer.duration(),
        buffer.sample_rate(),
        buffer.channels()
    );
    Ok(buffer)
}

#[allow(clippy::cast_possible_truncation)]
fn audio_buffer_to_f32(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
    match buffer {
        AudioBufferRef::F32(buf) => interleave(buf.planes().planes(), |s| s),
        AudioBufferRef::F64(buf) => interleave(buf.planes().planes(), |s| s as f32),
        #[allow(clippy::cast_precision_loss)]
        AudioBufferRef::S32(buf) => {
            interleave(buf.planes().planes(), |s| s as f32 / i32::MAX as f32)
        }
        AudioBufferRef::S16(buf) => {
            interleave(buf.planes().planes(), |s| f32::from(s) / f32::from(i16::MAX))
        }
        AudioBufferRef::U8(buf) => {
            interleave(buf.planes().planes(), |s| (f32::from(s) - 128.0) / 128.0)
        }
        _ => Vec::new(),
    }
}

fn interleave<T: Copy>(planes: &[&[T]], convert: impl Fn(T) -> f32) -> Vec<f32> {
    let Some(first) = planes.first() else {
        return Vec::new();
    };

    let frames = first.len();
    let mut output = Vec::with_capacity(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            output.push(convert(plane[frame]));
        }
    }
    output
}
