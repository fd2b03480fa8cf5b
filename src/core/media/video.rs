//! Camera frame sampling.
//!
//! The sampler grabs a frame from a [`FrameSource`] at a fixed rate, encodes
//! it as JPEG and hands it to the outbound channel under the same gating as
//! audio capture. Losing camera access disables the camera and ends the
//! sampler; the session itself continues.

use std::io::Cursor;
use std::time::Duration;

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::capture::CaptureControl;
use super::codec::MediaBlob;
use super::{MediaError, OutboundMedia};

/// Default sampling rate, in frames per second.
pub const DEFAULT_VIDEO_FPS: u32 = 5;

/// Default JPEG quality (0-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// A camera or other producer of still frames.
pub trait FrameSource: Send + 'static {
    /// Grab the latest frame. `Ok(None)` means no frame is ready yet.
    fn grab(&mut self) -> Result<Option<RgbImage>, MediaError>;
}

/// Encode an RGB frame as JPEG.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, MediaError> {
    let mut bytes = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(frame)
        .map_err(|e| MediaError::Encode(e.to_string()))?;
    Ok(bytes.into_inner())
}

/// Periodic JPEG sampler for a [`FrameSource`].
pub struct VideoSampler<F> {
    source: F,
    control: CaptureControl,
    outbound: mpsc::Sender<OutboundMedia>,
    period: Duration,
    quality: u8,
}

impl<F: FrameSource> VideoSampler<F> {
    pub fn new(source: F, control: CaptureControl, outbound: mpsc::Sender<OutboundMedia>) -> Self {
        Self {
            source,
            control,
            outbound,
            period: Duration::from_millis(1000 / DEFAULT_VIDEO_FPS as u64),
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.period = Duration::from_millis(1000 / fps.max(1) as u64);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Sample one frame if the gates allow it.
    pub fn sample_once(&mut self) -> Result<bool, MediaError> {
        if !self.control.is_camera_on() || !self.control.is_active() || self.outbound.is_closed()
        {
            return Ok(false);
        }

        let Some(frame) = self.source.grab()? else {
            return Ok(false);
        };

        let jpeg = encode_jpeg(&frame, self.quality)?;
        match self.outbound.try_send(OutboundMedia::Video(MediaBlob::jpeg(&jpeg))) {
            Ok(()) => Ok(true),
            Err(_) => {
                trace!("Outbound channel unavailable, dropping video frame");
                Ok(false)
            }
        }
    }

    /// Sample until cancelled or the camera becomes unavailable.
    ///
    /// Returns the access error that stopped the sampler, if any.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), MediaError> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Video sampler cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.sample_once() {
                        Ok(_) => {}
                        Err(e @ MediaError::DeviceAccessDenied(_)) => {
                            warn!(error = %e, "Camera unavailable, disabling video");
                            self.control.set_camera(false);
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to sample video frame");
                        }
                    }
                }
            }
        }
    }
}
