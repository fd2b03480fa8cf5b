//! PCM codec and wire blobs.
//!
//! Float samples in `[-1.0, 1.0]` are carried on the wire as 16-bit signed
//! little-endian PCM, base64-encoded with the standard alphabet and tagged with
//! a MIME type that declares the sample rate (`audio/pcm;rate=16000`).
//!
//! The conversion is intentionally lossy: encoding multiplies by 32768 and
//! truncates toward zero, so a sample of exactly `1.0` saturates to `i16::MAX`.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::MediaError;

/// Sample rate used for microphone capture.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio produced by the remote model.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Scale factor between float samples and 16-bit PCM.
const PCM_SCALE: f32 = 32768.0;

/// MIME type prefix for raw PCM chunks.
pub const PCM_MIME_PREFIX: &str = "audio/pcm";

/// MIME type for video frames.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// Encoded media chunk as it appears on the wire.
///
/// Serializes as `{ "data": "<base64>", "mimeType": "audio/pcm;rate=16000" }`,
/// which is the shape used by both the client protocol and the Gemini Live
/// realtime input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    /// Base64 payload (standard alphabet).
    pub data: String,
    /// MIME type of the decoded payload.
    pub mime_type: String,
}

impl MediaBlob {
    /// Encode float samples as a PCM blob at the given sample rate.
    pub fn pcm(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            data: STANDARD.encode(encode_samples(samples)),
            mime_type: pcm_mime_type(sample_rate),
        }
    }

    /// Wrap already-encoded JPEG bytes.
    pub fn jpeg(bytes: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(bytes),
            mime_type: JPEG_MIME_TYPE.to_string(),
        }
    }

    /// Whether the blob claims to carry raw PCM audio.
    pub fn is_pcm(&self) -> bool {
        self.mime_type.starts_with(PCM_MIME_PREFIX)
    }

    /// Decode the base64 payload to raw bytes.
    pub fn decode_bytes(&self) -> Result<Vec<u8>, MediaError> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| MediaError::MalformedPayload(format!("invalid base64: {e}")))
    }

    /// Decode the payload as PCM.
    ///
    /// The sample rate declared in the MIME type wins over `default_rate`.
    pub fn decode_pcm(&self, default_rate: u32, channels: u16) -> Result<AudioBuffer, MediaError> {
        let bytes = self.decode_bytes()?;
        let rate = parse_pcm_rate(&self.mime_type).unwrap_or(default_rate);
        decode_samples(&bytes, rate, channels)
    }
}

/// Decoded audio ready for playback.
///
/// Samples are interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Exact playback duration, in whole nanoseconds.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.frames() as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Samples for one channel, de-interleaved.
    pub fn channel(&self, index: u16) -> Vec<f32> {
        if index >= self.channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(index as usize)
            .step_by(self.channels as usize)
            .copied()
            .collect()
    }

    /// Mono mix of all channels.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(self.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect()
    }
}

/// Convert float samples to 16-bit little-endian PCM.
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // `as` truncates toward zero and saturates at the i16 bounds.
        let value = (sample * PCM_SCALE) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Convert 16-bit little-endian PCM back to float samples.
///
/// Fails when the byte length is not a whole number of frames.
pub fn decode_samples(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, MediaError> {
    if channels == 0 {
        return Err(MediaError::MalformedPayload(
            "channel count must be at least 1".to_string(),
        ));
    }
    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(MediaError::MalformedPayload(format!(
            "{} bytes is not a multiple of the {frame_bytes}-byte frame size",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM_SCALE)
        .collect();

    Ok(AudioBuffer::new(samples, sample_rate, channels))
}

/// `audio/pcm;rate=<rate>`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{PCM_MIME_PREFIX};rate={sample_rate}")
}

/// Extract the `rate` parameter from a PCM MIME type.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}
