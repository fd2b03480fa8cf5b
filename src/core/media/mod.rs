//! Local media handling: PCM codec, capture gating, video sampling and
//! gapless playback scheduling.

pub mod capture;
pub mod clock;
pub mod codec;
pub mod playback;
pub mod timeline;
pub mod video;

use thiserror::Error;

pub use capture::{CAPTURE_FRAME_SIZE, CaptureControl, CapturePipeline, FrameOutcome};
pub use clock::{ManualClock, OutputClock, SystemClock};
pub use codec::{
    AudioBuffer, CAPTURE_SAMPLE_RATE, MediaBlob, PLAYBACK_SAMPLE_RATE, decode_samples,
    encode_samples,
};
pub use playback::{AudioSink, Completion, PlaybackScheduler, ScheduledSegment, SegmentId};
pub use timeline::{Timeline, TimelineClock, TimelineRenderer};
pub use video::{FrameSource, VideoSampler};

/// Errors raised by local media handling.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Payload that cannot be decoded; the message is dropped.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Microphone or camera permission was refused or revoked.
    #[error("Device access denied: {0}")]
    DeviceAccessDenied(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Encoding error: {0}")]
    Encode(String),
}

/// Media produced locally and bound for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMedia {
    Audio(MediaBlob),
    Video(MediaBlob),
}
