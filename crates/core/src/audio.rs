//! Audio port models: the fixed PCM contract with the voice API, mic
//! framing, and the playback cursor used for gapless scheduling.

use bytes::Bytes;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Signed 16-bit little-endian mono PCM at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// What the voice API expects from the microphone.
pub const MIC_FORMAT: PcmFormat = PcmFormat {
    sample_rate: 16_000,
    channels: 1,
};

/// What the voice API produces for playback.
pub const SPEAKER_FORMAT: PcmFormat = PcmFormat {
    sample_rate: 24_000,
    channels: 1,
};

/// Samples per mic frame sent upstream.
pub const MIC_FRAME_SAMPLES: usize = 1024;

impl PcmFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * Self::BYTES_PER_SAMPLE
    }

    pub fn duration_of(&self, byte_len: usize) -> Duration {
        let bps = self.bytes_per_second() as u64;
        Duration::from_micros(byte_len as u64 * 1_000_000 / bps)
    }
}

/// Re-chunks arbitrary mic input into fixed-size frames.
#[derive(Debug)]
pub struct MicFramer {
    frame_bytes: usize,
    pending: Vec<u8>,
}

impl Default for MicFramer {
    fn default() -> Self {
        Self::new(MIC_FRAME_SAMPLES)
    }
}

impl MicFramer {
    pub fn new(frame_samples: usize) -> Self {
        let frame_bytes = frame_samples.max(1) * PcmFormat::BYTES_PER_SAMPLE;
        Self {
            frame_bytes,
            pending: Vec::with_capacity(frame_bytes),
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(data);
        let full = self.pending.len() / self.frame_bytes * self.frame_bytes;
        let ready: Vec<u8> = self.pending.drain(..full).collect();
        ready
            .chunks(self.frame_bytes)
            .map(Bytes::copy_from_slice)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledChunk {
    pub start: Instant,
    pub end: Instant,
}

/// Gapless playback cursor.
///
/// Each chunk starts exactly where the previous one ends, or now if the
/// player ran dry. A flush drops everything scheduled and resets the cursor
/// to now, which is what makes barge-in silent immediately.
#[derive(Debug)]
pub struct PlaybackScheduler {
    format: PcmFormat,
    origin: Instant,
    next_start: Instant,
    scheduled: VecDeque<ScheduledChunk>,
}

impl PlaybackScheduler {
    pub fn new(format: PcmFormat, now: Instant) -> Self {
        Self {
            format,
            origin: now,
            next_start: now,
            scheduled: VecDeque::new(),
        }
    }

    pub fn schedule(&mut self, byte_len: usize, now: Instant) -> ScheduledChunk {
        self.prune(now);
        let start = self.next_start.max(now);
        let chunk = ScheduledChunk {
            start,
            end: start + self.format.duration_of(byte_len),
        };
        self.next_start = chunk.end;
        self.scheduled.push_back(chunk);
        chunk
    }

    /// Drops all scheduled chunks. Returns how many were still queued or
    /// playing.
    pub fn flush(&mut self, now: Instant) -> usize {
        self.prune(now);
        let dropped = self.scheduled.len();
        self.scheduled.clear();
        self.next_start = now;
        dropped
    }

    /// Milliseconds from the scheduler origin, as sent to clients.
    pub fn offset_ms(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_millis() as u64
    }

    fn prune(&mut self, now: Instant) {
        while self.scheduled.front().is_some_and(|c| c.end <= now) {
            self.scheduled.pop_front();
        }
    }
}
