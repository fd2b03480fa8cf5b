//! Pull-based output timeline.
//!
//! [`Timeline`] is a device-agnostic output stage: the scheduler starts
//! segments on it at absolute times, and an audio device callback pulls mixed
//! mono frames with [`TimelineRenderer::render`]. The timeline is its own
//! clock, advanced by the number of frames rendered, so scheduling and
//! rendering always agree on "now".
//!
//! Segments that finish during a render are reported on the completion
//! channel handed out by [`Timeline::new`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::MediaError;
use super::clock::OutputClock;
use super::codec::AudioBuffer;
use super::playback::{AudioSink, SegmentId, StopError};

struct ActiveSegment {
    id: SegmentId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl ActiveSegment {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

struct TimelineState {
    position: u64,
    segments: Vec<ActiveSegment>,
}

/// Shared mixer state, implemented as the scheduler's sink.
#[derive(Clone)]
pub struct Timeline {
    sample_rate: u32,
    state: Arc<Mutex<TimelineState>>,
    completed: mpsc::UnboundedSender<SegmentId>,
}

/// Clock view of a [`Timeline`].
#[derive(Clone)]
pub struct TimelineClock {
    sample_rate: u32,
    state: Arc<Mutex<TimelineState>>,
}

/// Render side of a [`Timeline`], owned by the device callback.
#[derive(Clone)]
pub struct TimelineRenderer {
    timeline: Timeline,
}

impl Timeline {
    /// Create a timeline at `sample_rate` and the receiver of natural
    /// completions.
    pub fn new(sample_rate: u32) -> (Self, mpsc::UnboundedReceiver<SegmentId>) {
        let (completed, completions) = mpsc::unbounded_channel();
        let timeline = Self {
            sample_rate,
            state: Arc::new(Mutex::new(TimelineState {
                position: 0,
                segments: Vec::new(),
            })),
            completed,
        };
        (timeline, completions)
    }

    pub fn clock(&self) -> TimelineClock {
        TimelineClock {
            sample_rate: self.sample_rate,
            state: self.state.clone(),
        }
    }

    pub fn renderer(&self) -> TimelineRenderer {
        TimelineRenderer {
            timeline: self.clone(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn active_segments(&self) -> usize {
        self.state.lock().segments.len()
    }

    /// Nearest frame to `at`. Segment durations are truncated to whole
    /// nanoseconds, so a cursor can sit just short of a frame boundary.
    fn frame_at(&self, at: Duration) -> u64 {
        ((at.as_nanos() * self.sample_rate as u128 + 500_000_000) / 1_000_000_000) as u64
    }
}

impl AudioSink for Timeline {
    fn start(
        &mut self,
        id: SegmentId,
        buffer: AudioBuffer,
        at: Duration,
    ) -> Result<(), MediaError> {
        if buffer.sample_rate != self.sample_rate {
            return Err(MediaError::Device(format!(
                "buffer rate {} does not match output rate {}",
                buffer.sample_rate, self.sample_rate
            )));
        }

        let start_frame = self.frame_at(at);
        let samples = buffer.to_mono();
        let mut state = self.state.lock();

        // A zero-length segment has nothing to render; report it immediately.
        if samples.is_empty() || start_frame + samples.len() as u64 <= state.position {
            drop(state);
            let _ = self.completed.send(id);
            return Ok(());
        }

        state.segments.push(ActiveSegment {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) -> Result<(), StopError> {
        let mut state = self.state.lock();
        match state.segments.iter().position(|s| s.id == id) {
            Some(index) => {
                state.segments.swap_remove(index);
                Ok(())
            }
            None => Err(StopError::AlreadyFinished),
        }
    }
}

impl OutputClock for TimelineClock {
    fn now(&self) -> Duration {
        let position = self.state.lock().position;
        Duration::from_nanos((position as u128 * 1_000_000_000 / self.sample_rate as u128) as u64)
    }
}

impl TimelineRenderer {
    /// Fill `out` with the mix of every active segment and advance the clock.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let mut finished = Vec::new();
        {
            let mut state = self.timeline.state.lock();
            let begin = state.position;
            let end = begin + out.len() as u64;

            for segment in &state.segments {
                let from = segment.start_frame.max(begin);
                let to = segment.end_frame().min(end);
                for frame in from..to {
                    out[(frame - begin) as usize] +=
                        segment.samples[(frame - segment.start_frame) as usize];
                }
            }

            state.segments.retain(|segment| {
                if segment.end_frame() <= end {
                    finished.push(segment.id);
                    false
                } else {
                    true
                }
            });
            state.position = end;
        }

        for id in finished {
            trace!(segment = %id, "Segment finished");
            let _ = self.timeline.completed.send(id);
        }
    }
}
