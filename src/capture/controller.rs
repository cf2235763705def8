use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::capture::pipeline::FramePipeline;
use crate::capture::queue::IngestQueue;
use crate::capture::source::{CaptureOpener, HandleCloser};
use crate::capture::worker::{CaptureWorker, WorkerExit};
use crate::models::config::CaptureOptions;
use crate::models::record::PacketRecord;
use crate::models::session::{SessionEvent, SessionFlag, SessionState};
use crate::models::stats::CaptureStats;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::error::CaptureError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { session_id: Uuid },
    AlreadyCapturing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    AlreadyIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ToggleOutcome {
    Start(StartOutcome),
    Stop(StopOutcome),
}

/// Public view of the running session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub interface: String,
}

struct ActiveSession {
    id: Uuid,
    interface: String,
    closer: HandleCloser,
    worker: Option<JoinHandle<WorkerExit>>,
}

/// Owns the Idle/Capturing state machine and the single capture worker.
pub struct CaptureController {
    state: Arc<SessionFlag>,
    opener: Arc<dyn CaptureOpener>,
    options: CaptureOptions,
    pipeline: Arc<FramePipeline>,
    queue: Arc<IngestQueue<Arc<PacketRecord>>>,
    clock: Arc<dyn Clock>,
    session: Mutex<Option<ActiveSession>>,
    events: broadcast::Sender<SessionEvent>,
}

impl CaptureController {
    pub fn new(
        opener: Arc<dyn CaptureOpener>,
        options: CaptureOptions,
        pipeline: Arc<FramePipeline>,
        queue: Arc<IngestQueue<Arc<PacketRecord>>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(SessionFlag::new()),
            opener,
            options,
            pipeline,
            queue,
            clock: Arc::new(SystemClock),
            session: Mutex::new(None),
            events,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Begin capturing on `interface`.
    ///
    /// Returns `AlreadyCapturing` without side effects when a session is running.
    /// The handle is opened before this returns; on failure the state is back to
    /// Idle and an `OpenFailed` event has been published.
    pub fn start(&self, interface: &str) -> Result<StartOutcome, CaptureError> {
        if !self.state.try_begin() {
            info!("Capture already running, ignoring start on {}", interface);
            return Ok(StartOutcome::AlreadyCapturing);
        }

        let mut session = self.session.lock();

        // The previous worker has already been told to stop
        if let Some(previous) = session.take() {
            Self::join(previous);
        }

        info!("Starting capture on interface: {}", interface);
        let handle = match self.opener.open(interface, &self.options) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to open capture on {}: {}", interface, e);
                self.state.try_end();
                let reason = match &e {
                    CaptureError::OpenFailure { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                self.publish(SessionEvent::OpenFailed {
                    interface: interface.to_string(),
                    reason,
                });
                return Err(e);
            }
        };

        // A stop that raced with the open wins
        if !self.state.is_capturing() {
            warn!("Capture on {} was stopped while opening", interface);
            return Err(CaptureError::Closed);
        }

        self.pipeline.stats().reset(self.clock.now());

        let id = Uuid::new_v4();
        let closer = handle.closer();
        let worker = CaptureWorker::new(
            interface.to_string(),
            handle,
            self.pipeline.clone(),
            self.queue.clone(),
            self.state.clone(),
        );

        let spawned = thread::Builder::new()
            .name(format!("capture-{}", interface))
            .spawn(move || worker.run());

        let join_handle = match spawned {
            Ok(join_handle) => join_handle,
            Err(e) => {
                error!("Failed to spawn capture thread: {}", e);
                self.state.try_end();
                return Err(CaptureError::Capture(e.to_string()));
            }
        };

        *session = Some(ActiveSession {
            id,
            interface: interface.to_string(),
            closer,
            worker: Some(join_handle),
        });
        drop(session);

        info!("Capture session {} started on {}", id, interface);
        self.publish(SessionEvent::Started {
            session_id: id,
            interface: interface.to_string(),
        });
        Ok(StartOutcome::Started { session_id: id })
    }

    /// Stop the running session; a no-op when already Idle.
    ///
    /// The worker observes the closed handle within one read timeout.
    pub fn stop(&self) -> StopOutcome {
        if !self.state.try_end() {
            return StopOutcome::AlreadyIdle;
        }

        let session_id = {
            let session = self.session.lock();
            session.as_ref().map(|active| {
                active.closer.close();
                active.id
            })
        };

        self.pipeline.stats().mark_stopped(self.clock.now());
        info!("Stopping packet capture");
        self.publish(SessionEvent::Stopped { session_id });
        StopOutcome::Stopped
    }

    pub fn toggle(&self, interface: &str) -> Result<ToggleOutcome, CaptureError> {
        match self.state.current() {
            SessionState::Capturing => Ok(ToggleOutcome::Stop(self.stop())),
            SessionState::Idle => self.start(interface).map(ToggleOutcome::Start),
        }
    }

    /// Wait for the last worker to exit. Call after `stop`.
    pub fn join_worker(&self) -> Option<WorkerExit> {
        if self.state.is_capturing() {
            return None;
        }
        let mut session = self.session.lock();
        session.as_mut().and_then(|active| active.worker.take()).and_then(|worker| match worker.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!("Capture thread panicked");
                None
            }
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn is_capturing(&self) -> bool {
        self.state.is_capturing()
    }

    pub fn current_session(&self) -> Option<SessionInfo> {
        if !self.state.is_capturing() {
            return None;
        }
        self.session.lock().as_ref().map(|active| SessionInfo {
            session_id: active.id,
            interface: active.interface.clone(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &Arc<IngestQueue<Arc<PacketRecord>>> {
        &self.queue
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        self.pipeline.stats()
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn join(mut previous: ActiveSession) {
        previous.closer.close();
        if let Some(worker) = previous.worker.take() {
            if worker.join().is_err() {
                error!("Capture thread for session {} panicked", previous.id);
            }
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.state.try_end();
        if let Some(active) = self.session.get_mut().take() {
            Self::join(active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::local::LocalAddresses;
    use crate::capture::source::{CaptureHandle, Frame};
    use crate::storage::sink::NullSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Idle {
        closer: HandleCloser,
    }

    impl CaptureHandle for Idle {
        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            if self.closer.is_closed() {
                return Err(CaptureError::Closed);
            }
            thread::sleep(Duration::from_millis(5));
            Err(CaptureError::Timeout)
        }

        fn closer(&self) -> HandleCloser {
            self.closer.clone()
        }
    }

    #[derive(Default)]
    struct CountingOpener {
        opens: AtomicUsize,
        fail: bool,
    }

    impl CaptureOpener for CountingOpener {
        fn open(&self, interface: &str, _options: &CaptureOptions) -> Result<Box<dyn CaptureHandle>, CaptureError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CaptureError::OpenFailure {
                    interface: interface.to_string(),
                    reason: "permission denied".to_string(),
                });
            }
            Ok(Box::new(Idle {
                closer: HandleCloser::new(),
            }))
        }
    }

    fn controller(opener: Arc<CountingOpener>) -> CaptureController {
        let pipeline = Arc::new(FramePipeline::new(
            Arc::new(LocalAddresses::default()),
            Arc::new(NullSink),
            Arc::new(CaptureStats::new()),
        ));
        CaptureController::new(opener, CaptureOptions::default(), pipeline, Arc::new(IngestQueue::unbounded()))
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let controller = controller(Arc::new(CountingOpener::default()));
        assert_eq!(controller.stop(), StopOutcome::AlreadyIdle);
        assert_eq!(controller.stop(), StopOutcome::AlreadyIdle);
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_second_start_is_ignored() {
        let opener = Arc::new(CountingOpener::default());
        let controller = controller(opener.clone());

        assert!(matches!(controller.start("eth0"), Ok(StartOutcome::Started { .. })));
        assert_eq!(controller.start("eth0"), Ok(StartOutcome::AlreadyCapturing));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        assert_eq!(controller.stop(), StopOutcome::Stopped);
        assert!(controller.join_worker().is_some());
    }

    #[test]
    fn test_open_failure_returns_to_idle() {
        let opener = Arc::new(CountingOpener {
            opens: AtomicUsize::new(0),
            fail: true,
        });
        let controller = controller(opener);
        let mut events = controller.subscribe();

        let err = controller.start("nope0").unwrap_err();
        assert!(matches!(err, CaptureError::OpenFailure { .. }));
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.current_session().is_none());

        match events.try_recv().unwrap() {
            SessionEvent::OpenFailed { interface, reason } => {
                assert_eq!(interface, "nope0");
                assert_eq!(reason, "permission denied");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_toggle_alternates() {
        let controller = controller(Arc::new(CountingOpener::default()));

        let first = controller.toggle("eth0").unwrap();
        assert!(matches!(first, ToggleOutcome::Start(StartOutcome::Started { .. })));
        assert_eq!(controller.current_session().map(|s| s.interface), Some("eth0".to_string()));

        assert_eq!(controller.toggle("eth0").unwrap(), ToggleOutcome::Stop(StopOutcome::Stopped));
        assert!(controller.current_session().is_none());
    }

    #[test]
    fn test_session_times_come_from_clock() {
        use crate::utils::clock::ManualClock;
        use chrono::{Duration as ChronoDuration, TimeZone, Utc};

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let controller = controller(Arc::new(CountingOpener::default())).with_clock(clock.clone());

        controller.start("eth0").unwrap();
        clock.advance(ChronoDuration::seconds(3));
        controller.stop();

        let snap = controller.stats().snapshot(start + ChronoDuration::seconds(3));
        assert_eq!(snap.start_time, Some(start));
        assert_eq!(snap.end_time, Some(start + ChronoDuration::seconds(3)));
    }

    #[test]
    fn test_restart_joins_previous_worker() {
        let opener = Arc::new(CountingOpener::default());
        let controller = controller(opener.clone());

        controller.start("eth0").unwrap();
        controller.stop();
        assert!(matches!(controller.start("eth1"), Ok(StartOutcome::Started { .. })));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
        assert_eq!(controller.current_session().map(|s| s.interface), Some("eth1".to_string()));
        controller.stop();
    }
}
