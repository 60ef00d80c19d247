use crate::{
    camera::FrameSource,
    detector::HeadDetector,
    retry::{RetryDecision, RetryPolicy},
    state::{CaptureStatus, CountCell, FrameCell},
    store::HeadCountStore,
    telemetry::Metrics,
};
use opencv::core::Mat;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::broadcast::{self, error::TryRecvError},
    task::JoinHandle,
};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Gates history writes to at most one per interval, whatever the frame rate.
#[derive(Debug, Clone)]
pub struct LogSchedule {
    interval: Duration,
    last_flush: Instant,
}

impl LogSchedule {
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last_flush: start,
        }
    }

    pub fn should_flush(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_flush) >= self.interval {
            self.last_flush = now;
            true
        } else {
            false
        }
    }
}

struct FpsMeter {
    window_start: Instant,
    frames: u32,
}

impl FpsMeter {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
        }
    }

    fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.window_start = now;
        self.frames = 0;
        Some(fps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    Shutdown,
    GaveUp,
}

/// Handles into the state the capture loop publishes.
#[derive(Clone, Default)]
pub struct CaptureOutputs {
    pub frames: Arc<FrameCell>,
    pub count: Arc<CountCell>,
    pub status: Arc<CaptureStatus>,
}

/// Reads frames, counts heads, persists counts and publishes the latest
/// annotated frame. Runs on a dedicated blocking thread until shutdown.
pub struct CaptureLoop<S: FrameSource> {
    source: S,
    detector: HeadDetector,
    store: HeadCountStore,
    outputs: CaptureOutputs,
    retry_policy: Box<dyn RetryPolicy>,
    log_interval: Duration,
    metrics: Arc<Metrics>,
}

impl<S: FrameSource + 'static> CaptureLoop<S> {
    pub fn new(
        source: S,
        detector: HeadDetector,
        store: HeadCountStore,
        outputs: CaptureOutputs,
        retry_policy: Box<dyn RetryPolicy>,
        log_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        outputs.status.set_camera_open(source.is_opened());
        Self {
            source,
            detector,
            store,
            outputs,
            retry_policy,
            log_interval,
            metrics,
        }
    }

    pub fn spawn(self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<CaptureExit> {
        tokio::task::spawn_blocking(move || self.run(shutdown_rx))
    }

    pub fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> CaptureExit {
        tracing::info!("Capture loop started");

        let start = Instant::now();
        let mut log_schedule = LogSchedule::new(self.log_interval, start);
        let mut fps_meter = FpsMeter::new(start);
        let mut consecutive_failures: u32 = 0;

        let exit = loop {
            if shutdown_requested(&mut shutdown_rx) {
                tracing::info!("Capture loop received shutdown signal");
                break CaptureExit::Shutdown;
            }

            let frame = match self.source.read_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    frame
                }
                failed => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    match failed {
                        Err(e) => tracing::warn!("Failed to capture frame, retrying: {}", e),
                        _ => tracing::warn!("No frame available from camera, retrying"),
                    }

                    match self.retry_policy.on_failure(consecutive_failures) {
                        RetryDecision::RetryAfter(delay) => {
                            if sleep_or_shutdown(&mut shutdown_rx, delay) {
                                tracing::info!("Capture loop received shutdown signal");
                                break CaptureExit::Shutdown;
                            }
                            continue;
                        }
                        RetryDecision::GiveUp => {
                            tracing::error!(
                                "Giving up on camera after {} consecutive read failures",
                                consecutive_failures
                            );
                            break CaptureExit::GaveUp;
                        }
                    }
                }
            };

            let now = Instant::now();
            self.process_frame(frame, now, &mut log_schedule);
            if let Some(fps) = fps_meter.tick(now) {
                self.metrics.record_capture_fps(fps);
            }
        };

        self.source.release();
        self.outputs.status.set_camera_open(false);
        tracing::info!("Capture loop stopped");
        exit
    }

    fn process_frame(&mut self, frame: Mat, now: Instant, log_schedule: &mut LogSchedule) {
        let started = Instant::now();
        let (annotated, count) = match self.detector.detect(frame) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Skipping frame: {}", e);
                return;
            }
        };
        self.metrics
            .record_inference_duration(started.elapsed().as_millis() as u64);

        self.outputs.count.set(count);
        self.metrics.record_detected_heads(count);

        if let Err(e) = self.store.update_real_time_stats(count) {
            tracing::error!("Failed to update real time stats: {}", e);
        }

        if log_schedule.should_flush(now) {
            match self.store.log_detection(count) {
                Ok(()) => tracing::debug!("Logged {} detected heads", count),
                Err(e) => tracing::error!("Failed to log detection: {}", e),
            }
        }

        self.outputs.frames.set(annotated);
    }
}

fn shutdown_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty))
}

/// Sleeps for `delay`, waking early when shutdown is requested.
fn sleep_or_shutdown(shutdown_rx: &mut broadcast::Receiver<()>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if shutdown_requested(shutdown_rx) {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        std::thread::sleep(remaining.min(SHUTDOWN_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bounding_box::Detection,
        camera::CameraError,
        model_service::{DetectorError, ModelService},
        retry::{ExponentialBackoff, FixedDelay},
    };
    use opencv::core::{Scalar, CV_8UC3};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    type Read = Result<Option<Mat>, CameraError>;

    struct ScriptedSource {
        reads: VecDeque<Read>,
        read_count: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(reads: Vec<Read>) -> Self {
            Self {
                reads: reads.into(),
                read_count: Arc::new(AtomicUsize::new(0)),
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Read {
            self.read_count.fetch_add(1, Ordering::SeqCst);
            self.reads.pop_front().unwrap_or(Ok(None))
        }

        fn is_opened(&self) -> bool {
            !self.released.load(Ordering::SeqCst)
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct TwoHeads;

    impl ModelService for TwoHeads {
        fn infer(&self, _frame: &Mat) -> Result<Vec<Detection>, DetectorError> {
            let head = |x1: f32| Detection {
                x1,
                y1: 2.0,
                x2: x1 + 8.0,
                y2: 10.0,
                class_id: 0,
                confidence: 0.9,
            };
            Ok(vec![head(2.0), head(20.0)])
        }
    }

    fn frame() -> Read {
        Ok(Some(
            Mat::new_rows_cols_with_default(16, 32, CV_8UC3, Scalar::all(0.0)).unwrap(),
        ))
    }

    fn temp_store() -> (TempDir, HeadCountStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HeadCountStore::open(dir.path().join("capture.db")).unwrap();
        (dir, store)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn capture_loop(
        source: ScriptedSource,
        store: &HeadCountStore,
        outputs: &CaptureOutputs,
        retry_policy: Box<dyn RetryPolicy>,
        log_interval: Duration,
    ) -> CaptureLoop<ScriptedSource> {
        CaptureLoop::new(
            source,
            HeadDetector::new(Some(Arc::new(TwoHeads))),
            store.clone(),
            outputs.clone(),
            retry_policy,
            log_interval,
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[test]
    fn test_log_schedule_is_independent_of_frame_rate() {
        let start = Instant::now();
        let mut schedule = LogSchedule::new(Duration::from_secs(5), start);

        let flushes = (1..=360)
            .map(|i| start + Duration::from_millis(i * 1000 / 30))
            .filter(|&now| schedule.should_flush(now))
            .count();

        assert_eq!(flushes, 2);
    }

    #[test]
    fn test_log_schedule_at_low_frame_rate() {
        let start = Instant::now();
        let mut schedule = LogSchedule::new(Duration::from_secs(5), start);

        let flushes = (1..=12)
            .map(|s| start + Duration::from_secs(s))
            .filter(|&now| schedule.should_flush(now))
            .count();

        assert_eq!(flushes, 2);
    }

    #[test]
    fn test_camera_reported_open_before_loop_runs() {
        let (_dir, store) = temp_store();
        let outputs = CaptureOutputs::default();

        let _capture = capture_loop(
            ScriptedSource::new(vec![]),
            &store,
            &outputs,
            Box::new(FixedDelay::default()),
            Duration::from_secs(5),
        );

        assert!(outputs.status.camera_open());
    }

    #[test]
    fn test_processes_frames_and_publishes_state() {
        let (_dir, store) = temp_store();
        let outputs = CaptureOutputs::default();
        let source = ScriptedSource::new(vec![frame(), frame(), frame()]);
        let released = source.released.clone();
        let capture = capture_loop(
            source,
            &store,
            &outputs,
            Box::new(FixedDelay::new(Duration::from_millis(1))),
            Duration::ZERO,
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = std::thread::spawn(move || capture.run(shutdown_rx));

        wait_for(|| store.count_detection_logs().unwrap() == 3);
        assert_eq!(outputs.count.get(), 2);
        assert!(outputs.frames.has_frame());
        assert!(outputs.status.camera_open());
        assert_eq!(store.get_real_time_stats().unwrap().current_heads, 2);

        shutdown_tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), CaptureExit::Shutdown);
        assert!(released.load(Ordering::SeqCst));
        assert!(!outputs.status.camera_open());
    }

    #[test]
    fn test_read_failures_are_retried() {
        let (_dir, store) = temp_store();
        let outputs = CaptureOutputs::default();
        let failure = Err(CameraError::ReadFrameFailed(opencv::Error::new(
            opencv::core::StsError,
            "device busy",
        )));
        let source = ScriptedSource::new(vec![failure, Ok(None), frame()]);
        let read_count = source.read_count.clone();
        let capture = capture_loop(
            source,
            &store,
            &outputs,
            Box::new(FixedDelay::new(Duration::from_millis(1))),
            Duration::from_secs(5),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = std::thread::spawn(move || capture.run(shutdown_rx));

        wait_for(|| outputs.count.get() == 2);
        assert!(read_count.load(Ordering::SeqCst) >= 3);
        // the log interval has not elapsed yet
        assert_eq!(store.count_detection_logs().unwrap(), 0);

        shutdown_tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), CaptureExit::Shutdown);
    }

    #[test]
    fn test_bounded_policy_gives_up() {
        let (_dir, store) = temp_store();
        let outputs = CaptureOutputs::default();
        let source = ScriptedSource::new(vec![]);
        let released = source.released.clone();
        let capture = capture_loop(
            source,
            &store,
            &outputs,
            Box::new(
                ExponentialBackoff::new(
                    Duration::from_millis(1),
                    2,
                    Duration::from_millis(4),
                    Some(3),
                )
                .without_jitter(),
            ),
            Duration::from_secs(5),
        );

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        assert_eq!(capture.run(shutdown_rx), CaptureExit::GaveUp);
        assert!(released.load(Ordering::SeqCst));
        assert!(!outputs.status.camera_open());
        assert_eq!(outputs.count.get(), 0);
    }

    #[test]
    fn test_dropped_sender_stops_the_loop() {
        let (_dir, store) = temp_store();
        let outputs = CaptureOutputs::default();
        let capture = capture_loop(
            ScriptedSource::new(vec![]),
            &store,
            &outputs,
            Box::new(FixedDelay::default()),
            Duration::from_secs(5),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        drop(shutdown_tx);

        assert_eq!(capture.run(shutdown_rx), CaptureExit::Shutdown);
    }
}
