//! Frame-processing statistics, written only by the orchestrator thread but
//! readable from anywhere

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam::utils::CachePadded;

pub struct PipelineStats {
    frames: CachePadded<AtomicU64>,
    detections: CachePadded<AtomicU64>,
    capture_failures: CachePadded<AtomicU64>,
    stream_rejects: CachePadded<AtomicU64>,
    started: Instant,
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub detections: u64,
    pub capture_failures: u64,
    pub stream_rejects: u64,
    pub uptime_secs: u64,
}

impl StatsSnapshot {
    pub fn avg_fps(&self) -> f64 {
        if self.uptime_secs == 0 {
            0.0
        } else {
            self.frames as f64 / self.uptime_secs as f64
        }
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            frames: CachePadded::new(AtomicU64::new(0)),
            detections: CachePadded::new(AtomicU64::new(0)),
            capture_failures: CachePadded::new(AtomicU64::new(0)),
            stream_rejects: CachePadded::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    pub fn frame_processed(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn detections_found(&self, count: u64) {
        self.detections.fetch_add(count, Ordering::Relaxed);
    }

    pub fn capture_failed(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_rejected(&self) {
        self.stream_rejects.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset counters; only called from the orchestrator thread
    pub fn reset(&mut self) {
        self.frames.store(0, Ordering::Relaxed);
        self.detections.store(0, Ordering::Relaxed);
        self.capture_failures.store(0, Ordering::Relaxed);
        self.stream_rejects.store(0, Ordering::Relaxed);
        self.started = Instant::now();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            stream_rejects: self.stream_rejects.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let mut stats = PipelineStats::new();
        stats.frame_processed();
        stats.frame_processed();
        stats.detections_found(5);
        stats.capture_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.frames, 2);
        assert_eq!(snap.detections, 5);
        assert_eq!(snap.capture_failures, 1);

        stats.reset();
        let snap = stats.snapshot();
        assert_eq!(snap.frames, 0);
        assert_eq!(snap.detections, 0);
    }

    #[test]
    fn fps_handles_zero_uptime() {
        let stats = PipelineStats::new();
        assert_eq!(stats.snapshot().avg_fps(), 0.0);
    }
}
