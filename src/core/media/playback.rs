//! Gapless playback scheduling.
//!
//! Decoded buffers arrive in receive order and are placed back-to-back on the
//! output device clock. A single cursor marks where the next buffer starts; it
//! only moves forward, except on a flush where it is pulled back to "now" so
//! that post-interruption audio starts immediately.
//!
//! Invariants:
//! - the scheduled set holds exactly the segments that were started and have
//!   neither completed nor been stopped;
//! - consecutive segments scheduled while the cursor was ahead of the clock
//!   satisfy `next.start == previous.start + previous.duration`;
//! - after [`PlaybackScheduler::flush_all`] the set is empty and the cursor
//!   equals the clock reading taken during the flush.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use super::MediaError;
use super::clock::OutputClock;
use super::codec::AudioBuffer;

/// Identifier of a scheduled segment, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment-{}", self.0)
    }
}

/// A buffer placed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledSegment {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Failure to stop a segment on the device.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StopError {
    /// The segment completed naturally before the stop request reached it.
    #[error("segment already finished")]
    AlreadyFinished,

    #[error("device error: {0}")]
    Device(String),
}

/// Output device seam.
///
/// `start` must begin playback of the buffer at the absolute device time
/// `at`. When a segment finishes on its own, the sink reports its id back to
/// the scheduler's owner, which then calls [`PlaybackScheduler::complete`].
pub trait AudioSink: Send {
    fn start(&mut self, id: SegmentId, buffer: AudioBuffer, at: Duration)
    -> Result<(), MediaError>;

    fn stop(&mut self, id: SegmentId) -> Result<(), StopError>;
}

/// Result of a natural completion notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Other segments are still scheduled.
    Pending,
    /// The last scheduled segment finished; playback has drained.
    Drained,
    /// The segment was not scheduled (already flushed or never started).
    Unknown,
}

/// Schedules decoded buffers contiguously on an output device.
pub struct PlaybackScheduler<S, C> {
    sink: S,
    clock: C,
    cursor: Duration,
    next_id: u64,
    scheduled: BTreeMap<SegmentId, ScheduledSegment>,
}

impl<S: AudioSink, C: OutputClock> PlaybackScheduler<S, C> {
    pub fn new(sink: S, clock: C) -> Self {
        Self {
            sink,
            clock,
            cursor: Duration::ZERO,
            next_id: 0,
            scheduled: BTreeMap::new(),
        }
    }

    /// Schedule `buffer` to start at `max(cursor, now)`.
    ///
    /// Empty buffers are started like any other so that their completion
    /// still drives the drain signal.
    pub fn enqueue(&mut self, buffer: AudioBuffer) -> Result<ScheduledSegment, MediaError> {
        let now = self.clock.now();
        if self.cursor < now {
            self.cursor = now;
        }

        let id = SegmentId(self.next_id);
        self.next_id += 1;

        let segment = ScheduledSegment {
            id,
            start: self.cursor,
            duration: buffer.duration(),
        };

        self.sink.start(id, buffer, segment.start)?;

        self.cursor = segment.end();
        self.scheduled.insert(id, segment);

        trace!(
            segment = %id,
            start_ms = segment.start.as_millis() as u64,
            duration_ms = segment.duration.as_millis() as u64,
            "Scheduled playback segment"
        );

        Ok(segment)
    }

    /// Record the natural completion of a segment.
    pub fn complete(&mut self, id: SegmentId) -> Completion {
        if self.scheduled.remove(&id).is_none() {
            return Completion::Unknown;
        }
        if self.scheduled.is_empty() {
            debug!(segment = %id, "Playback drained");
            Completion::Drained
        } else {
            Completion::Pending
        }
    }

    /// Stop every scheduled segment and pull the cursor back to now.
    ///
    /// Returns the number of segments that were scheduled.
    pub fn flush_all(&mut self) -> usize {
        let flushed = std::mem::take(&mut self.scheduled);
        for id in flushed.keys() {
            match self.sink.stop(*id) {
                Ok(()) | Err(StopError::AlreadyFinished) => {}
                Err(e) => warn!(segment = %id, error = %e, "Failed to stop playback segment"),
            }
        }
        self.cursor = self.clock.now();

        if !flushed.is_empty() {
            debug!(count = flushed.len(), "Flushed playback");
        }
        flushed.len()
    }

    /// Teardown form of [`flush_all`](Self::flush_all).
    pub fn reset(&mut self) {
        self.flush_all();
    }

    pub fn cursor(&self) -> Duration {
        self.cursor
    }

    pub fn is_idle(&self) -> bool {
        self.scheduled.is_empty()
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    /// Segments in scheduling order.
    pub fn scheduled(&self) -> impl Iterator<Item = &ScheduledSegment> {
        self.scheduled.values()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
