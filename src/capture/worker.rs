use log::{debug, error, info, trace, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::capture::pipeline::FramePipeline;
use crate::capture::queue::IngestQueue;
use crate::capture::source::{CaptureHandle, HandleCloser};
use crate::models::record::PacketRecord;
use crate::models::session::SessionFlag;
use crate::utils::error::CaptureError;

/// Why the capture loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The handle reported it was closed
    HandleClosed,
    /// The session left the capturing state
    SessionEnded,
}

/// Owns one open capture handle and drives the pipeline for every frame.
pub struct CaptureWorker {
    interface: String,
    handle: Box<dyn CaptureHandle>,
    closer: HandleCloser,
    pipeline: Arc<FramePipeline>,
    queue: Arc<IngestQueue<Arc<PacketRecord>>>,
    state: Arc<SessionFlag>,
}

impl CaptureWorker {
    pub fn new(
        interface: String,
        handle: Box<dyn CaptureHandle>,
        pipeline: Arc<FramePipeline>,
        queue: Arc<IngestQueue<Arc<PacketRecord>>>,
        state: Arc<SessionFlag>,
    ) -> Self {
        let closer = handle.closer();
        Self {
            interface,
            handle,
            closer,
            pipeline,
            queue,
            state,
        }
    }

    /// Capture until the handle closes or the session ends.
    ///
    /// The handle is dropped when this returns, whichever way the loop ended.
    pub fn run(self) -> WorkerExit {
        let CaptureWorker {
            interface,
            mut handle,
            closer,
            pipeline,
            queue,
            state,
        } = self;

        info!("Starting capture loop for interface: {}", interface);
        let mut frames: u64 = 0;

        let exit = loop {
            if !state.is_capturing() {
                break WorkerExit::SessionEnded;
            }
            if closer.is_closed() {
                break WorkerExit::HandleClosed;
            }

            match handle.next_frame() {
                Ok(frame) => {
                    let processed = panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(&frame)));
                    match processed {
                        Ok(record) => {
                            queue.push(Arc::new(record));
                            frames += 1;
                        }
                        Err(_) => {
                            error!("Unexpected error while processing a {} byte frame", frame.data.len());
                            pipeline.stats().record_error();
                        }
                    }
                }
                Err(CaptureError::Timeout) => {
                    trace!("Packet capture timed out, continuing");
                    pipeline.stats().record_timeout();
                }
                Err(CaptureError::EndOfStream) => {
                    warn!("Capture on {} reached end of stream unexpectedly", interface);
                }
                Err(CaptureError::Closed) => {
                    debug!("Capture handle on {} was closed", interface);
                    break WorkerExit::HandleClosed;
                }
                Err(e) => {
                    error!("Unexpected error during capture: {}", e);
                    pipeline.stats().record_error();
                }
            }
        };

        drop(handle);
        info!("Capture loop stopped for interface: {} ({} frames)", interface, frames);
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::local::LocalAddresses;
    use crate::capture::source::{Frame, LinkType};
    use crate::models::stats::CaptureStats;
    use crate::storage::sink::NullSink;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Plays back a fixed script, then reports `Closed`
    struct Scripted {
        script: VecDeque<Result<Frame, CaptureError>>,
        closer: HandleCloser,
        dropped: Arc<AtomicBool>,
    }

    impl CaptureHandle for Scripted {
        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            if self.closer.is_closed() {
                return Err(CaptureError::Closed);
            }
            self.script.pop_front().unwrap_or(Err(CaptureError::Closed))
        }

        fn closer(&self) -> HandleCloser {
            self.closer.clone()
        }
    }

    impl Drop for Scripted {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn frame(bytes: &[u8]) -> Frame {
        Frame {
            data: bytes.to_vec(),
            timestamp: Utc::now(),
            link_type: LinkType::Ethernet,
        }
    }

    fn worker(script: Vec<Result<Frame, CaptureError>>) -> (CaptureWorker, Arc<IngestQueue<Arc<PacketRecord>>>, Arc<AtomicBool>, Arc<FramePipeline>) {
        let dropped = Arc::new(AtomicBool::new(false));
        let handle = Scripted {
            script: script.into(),
            closer: HandleCloser::new(),
            dropped: dropped.clone(),
        };
        let pipeline = Arc::new(FramePipeline::new(
            Arc::new(LocalAddresses::default()),
            Arc::new(NullSink),
            Arc::new(CaptureStats::new()),
        ));
        let queue = Arc::new(IngestQueue::unbounded());
        let state = Arc::new(SessionFlag::new());
        assert!(state.try_begin());
        let worker = CaptureWorker::new("test0".to_string(), Box::new(handle), pipeline.clone(), queue.clone(), state);
        (worker, queue, dropped, pipeline)
    }

    #[test]
    fn test_recoverable_errors_do_not_stop_the_loop() {
        let (worker, queue, dropped, pipeline) = worker(vec![
            Ok(frame(&[0u8; 60])),
            Err(CaptureError::Timeout),
            Err(CaptureError::EndOfStream),
            Err(CaptureError::Capture("read error".to_string())),
            Ok(frame(&[1u8; 3])),
        ]);

        assert_eq!(worker.run(), WorkerExit::HandleClosed);
        assert_eq!(queue.len(), 2);
        assert!(dropped.load(Ordering::SeqCst));

        let snap = pipeline.stats().snapshot(Utc::now());
        assert_eq!(snap.total_packets, 2);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.errors, 1);
    }

    #[test]
    fn test_closed_handle_ends_loop_immediately() {
        let (worker, queue, dropped, _) = worker(vec![Ok(frame(&[0u8; 60]))]);
        worker.closer.close();
        assert_eq!(worker.run(), WorkerExit::HandleClosed);
        assert!(queue.is_empty());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_ended_session_stops_worker() {
        let (worker, _, dropped, _) = worker(vec![Err(CaptureError::Timeout)]);
        assert!(worker.state.try_end());
        assert_eq!(worker.run(), WorkerExit::SessionEnded);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_frames_are_queued_in_capture_order() {
        let frames: Vec<Result<Frame, CaptureError>> = (1..=5u8).map(|n| Ok(frame(&vec![n; n as usize]))).collect();
        let (worker, queue, _, _) = worker(frames);
        worker.run();
        let lengths: Vec<usize> = queue.pop_batch(10).iter().map(|r| r.length).collect();
        assert_eq!(lengths, vec![1, 2, 3, 4, 5]);
    }
}
