//! Microphone capture pipeline.
//!
//! Fixed-size float frames from an input device are gated, encoded and handed
//! to the outbound channel without ever blocking the device thread. Nothing is
//! queued or retried here: when the channel is full or closed the frame is
//! dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::trace;

use super::OutboundMedia;
use super::codec::{CAPTURE_SAMPLE_RATE, MediaBlob};

/// Samples per capture frame.
pub const CAPTURE_FRAME_SIZE: usize = 2048;

/// Shared capture flags.
///
/// Cloned into whichever thread toggles mute or session activity; the
/// pipeline reads them on every frame.
#[derive(Debug, Clone, Default)]
pub struct CaptureControl {
    muted: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    camera: Arc<AtomicBool>,
}

impl CaptureControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn toggle_mute(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_camera(&self, on: bool) {
        self.camera.store(on, Ordering::Release);
    }

    pub fn is_camera_on(&self) -> bool {
        self.camera.load(Ordering::Acquire)
    }
}

/// What happened to a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    Muted,
    Inactive,
    ChannelClosed,
    /// The outbound channel was full; the frame is lost.
    Dropped,
}

/// Encodes captured frames into outbound audio chunks.
#[derive(Debug, Clone)]
pub struct CapturePipeline {
    control: CaptureControl,
    outbound: mpsc::Sender<OutboundMedia>,
    sample_rate: u32,
}

impl CapturePipeline {
    pub fn new(control: CaptureControl, outbound: mpsc::Sender<OutboundMedia>) -> Self {
        Self {
            control,
            outbound,
            sample_rate: CAPTURE_SAMPLE_RATE,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn control(&self) -> &CaptureControl {
        &self.control
    }

    /// Handle one frame from the input device.
    ///
    /// Safe to call from a non-async device callback.
    pub fn on_frame(&self, frame: &[f32]) -> FrameOutcome {
        if !self.control.is_active() {
            return FrameOutcome::Inactive;
        }
        if self.control.is_muted() {
            return FrameOutcome::Muted;
        }
        if self.outbound.is_closed() {
            return FrameOutcome::ChannelClosed;
        }

        let blob = MediaBlob::pcm(frame, self.sample_rate);
        match self.outbound.try_send(OutboundMedia::Audio(blob)) {
            Ok(()) => FrameOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Outbound channel full, dropping capture frame");
                FrameOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => FrameOutcome::ChannelClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(capacity: usize) -> (CapturePipeline, mpsc::Receiver<OutboundMedia>) {
        let (tx, rx) = mpsc::channel(capacity);
        (CapturePipeline::new(CaptureControl::new(), tx), rx)
    }

    #[test]
    fn test_inactive_pipeline_sends_nothing() {
        let (pipeline, mut rx) = pipeline(4);
        assert_eq!(pipeline.on_frame(&[0.1; 16]), FrameOutcome::Inactive);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_active_frame_is_encoded() {
        let (pipeline, mut rx) = pipeline(4);
        pipeline.control().set_active(true);

        assert_eq!(
            pipeline.on_frame(&[0.5; CAPTURE_FRAME_SIZE]),
            FrameOutcome::Sent
        );
        match rx.try_recv().unwrap() {
            OutboundMedia::Audio(blob) => {
                assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
                assert_eq!(blob.decode_bytes().unwrap().len(), CAPTURE_FRAME_SIZE * 2);
            }
            other => panic!("unexpected outbound media: {other:?}"),
        }
    }

    #[test]
    fn test_mute_gates_every_frame() {
        let (pipeline, mut rx) = pipeline(64);
        let control = pipeline.control().clone();
        control.set_active(true);
        control.set_muted(true);

        for _ in 0..20 {
            assert_eq!(pipeline.on_frame(&[0.2; 32]), FrameOutcome::Muted);
        }
        assert!(rx.try_recv().is_err());

        assert!(!control.toggle_mute());
        assert_eq!(pipeline.on_frame(&[0.2; 32]), FrameOutcome::Sent);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_toggle_mute_returns_new_state() {
        let control = CaptureControl::new();
        assert!(control.toggle_mute());
        assert!(control.is_muted());
        assert!(!control.toggle_mute());
        assert!(!control.is_muted());
    }

    #[test]
    fn test_full_channel_drops_frame() {
        let (pipeline, _rx) = pipeline(1);
        pipeline.control().set_active(true);
        assert_eq!(pipeline.on_frame(&[0.0; 8]), FrameOutcome::Sent);
        assert_eq!(pipeline.on_frame(&[0.0; 8]), FrameOutcome::Dropped);
    }

    #[test]
    fn test_closed_channel_is_noop() {
        let (pipeline, rx) = pipeline(4);
        pipeline.control().set_active(true);
        drop(rx);
        assert_eq!(pipeline.on_frame(&[0.0; 8]), FrameOutcome::ChannelClosed);
    }
}
