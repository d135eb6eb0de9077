//! Metadata sink: bounded queue in front of a background HTTP publisher.
//!
//! The producer side never blocks: at capacity the oldest record is evicted.
//! The publisher thread drains one record per cycle and converts delivery
//! failures into counters, so the pipeline keeps running with an
//! unreachable collector.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::detect::Detection;
use crate::sink::record::MetadataRecord;

/// At-most-N-records backlog; enqueuing past this evicts the oldest
pub const QUEUE_CAPACITY: usize = 100;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("publisher already running")]
    AlreadyRunning,
}

struct Shared {
    queue: Mutex<VecDeque<MetadataRecord>>,
    running: AtomicBool,
    published: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
}

pub struct MetadataSink {
    endpoint_url: String,
    publish_interval: Duration,
    shared: Arc<Shared>,
    publisher: Option<thread::JoinHandle<()>>,
}

impl MetadataSink {
    pub fn new(host: &str, port: u16, endpoint: &str, publish_interval_ms: u64) -> Self {
        let endpoint_url = format!("http://{}:{}{}", host, port, endpoint);
        info!(
            "Metadata sink targeting {} every {}ms",
            endpoint_url, publish_interval_ms
        );

        Self {
            endpoint_url,
            publish_interval: Duration::from_millis(publish_interval_ms),
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
                running: AtomicBool::new(false),
                published: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
            }),
            publisher: None,
        }
    }

    /// Spawn the publisher thread
    pub fn start(&mut self) -> Result<(), MetadataError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(MetadataError::AlreadyRunning);
        }

        let shared = self.shared.clone();
        let url = self.endpoint_url.clone();
        let interval = self.publish_interval;

        self.publisher = Some(thread::spawn(move || {
            let agent = ureq::AgentBuilder::new()
                .timeout(DELIVERY_TIMEOUT)
                .build();

            while shared.running.load(Ordering::SeqCst) {
                let record = shared.queue.lock().unwrap().pop_front();

                // Serialization and delivery happen with the lock released
                if let Some(record) = record {
                    match record.to_json() {
                        Ok(json) => match agent
                            .post(&url)
                            .set("Content-Type", "application/json")
                            .send_string(&json)
                        {
                            Ok(_) => {
                                shared.published.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                // No retry, no backoff; the next cycle moves on
                                shared.failed.fetch_add(1, Ordering::Relaxed);
                                debug!("metadata delivery failed: {}", e);
                            }
                        },
                        Err(e) => {
                            shared.failed.fetch_add(1, Ordering::Relaxed);
                            warn!("metadata serialization failed: {}", e);
                        }
                    }
                }

                thread::sleep(interval);
            }
        }));

        info!("Metadata publisher started");
        Ok(())
    }

    /// Append a record; at capacity the oldest record is evicted so the
    /// producer never blocks
    pub fn enqueue(
        &self,
        detections: Vec<Detection>,
        frame_width: u32,
        frame_height: u32,
        camera_id: &str,
    ) {
        let record = MetadataRecord::new(detections, frame_width, frame_height, camera_id);

        let mut queue = self.shared.queue.lock().unwrap();
        queue.push_back(record);
        if queue.len() > QUEUE_CAPACITY {
            queue.pop_front();
            self.shared.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn published_count(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    pub fn evicted_count(&self) -> u64 {
        self.shared.evicted.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop the publisher thread and join it
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.publisher.take() {
            let _ = handle.join();
        }
        info!("Metadata publisher stopped");
    }

    #[cfg(test)]
    fn front_frame_width(&self) -> Option<u32> {
        self.shared
            .queue
            .lock()
            .unwrap()
            .front()
            .map(|r| r.frame_width)
    }
}

impl Drop for MetadataSink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_bounded_and_evicts_oldest() {
        let sink = MetadataSink::new("localhost", 8080, "/metadata", 100);

        // Tag each record through frame_width: 1..=101
        for i in 1..=101u32 {
            sink.enqueue(Vec::new(), i, 480, "camera_0");
        }

        assert_eq!(sink.queue_depth(), QUEUE_CAPACITY);
        assert_eq!(sink.evicted_count(), 1);
        // Record 1 was evicted; 2..=101 remain in order
        assert_eq!(sink.front_frame_width(), Some(2));
    }

    #[test]
    fn enqueue_never_blocks_without_consumer() {
        let sink = MetadataSink::new("localhost", 8080, "/metadata", 100);
        for _ in 0..1000 {
            sink.enqueue(Vec::new(), 640, 480, "camera_0");
        }
        assert_eq!(sink.queue_depth(), QUEUE_CAPACITY);
    }

    #[test]
    fn unreachable_collector_counts_failures_quietly() {
        // Port 9 (discard) with nothing listening: connection refused
        let mut sink = MetadataSink::new("127.0.0.1", 9, "/metadata", 5);
        sink.enqueue(Vec::new(), 640, 480, "camera_0");
        sink.start().unwrap();

        let mut waited = 0;
        while sink.queue_depth() > 0 && waited < 2000 {
            thread::sleep(Duration::from_millis(10));
            waited += 10;
        }

        sink.stop();
        assert_eq!(sink.queue_depth(), 0);
        assert_eq!(sink.published_count(), 0);
        assert!(sink.failure_count() >= 1);
        assert!(!sink.is_running());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut sink = MetadataSink::new("127.0.0.1", 9, "/metadata", 50);
        sink.start().unwrap();
        assert!(sink.start().is_err());
        sink.stop();
    }
}
