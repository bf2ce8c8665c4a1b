//! Background capture thread.
//!
//! The driver moves an [`InferenceEngine`] onto a dedicated OS thread and
//! feeds every prediction it produces into a [`FrameSink`]. The returned
//! [`CaptureHandle`] can stop and join the thread; the server keeps it for
//! the life of the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use crate::engine::{InferenceEngine, Prediction, VideoFrame};
use crate::sink::FrameSink;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
}

/// Handle for the capture thread.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    sink: Arc<FrameSink>,
    handle: JoinHandle<()>,
}

impl CaptureHandle {
    /// Signal the engine to stop and block until the thread exits.
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.handle.join().is_err() {
            error!("capture thread panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn sink(&self) -> &FrameSink {
        &self.sink
    }
}

pub struct CaptureDriver;

impl CaptureDriver {
    /// Spawn the capture thread running `engine` and return a handle to it.
    ///
    /// Engine failures are logged and end the thread; they are never returned
    /// here. Only a failure to create the thread itself is an error.
    pub fn spawn<E: InferenceEngine>(
        mut engine: E,
        sink: Arc<FrameSink>,
    ) -> Result<CaptureHandle, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_sink = Arc::clone(&sink);

        let handle = thread::Builder::new()
            .name("frame-capture".into())
            .spawn(move || {
                let engine_name = engine.name().to_string();
                info!(engine = engine_name, "capture thread started");
                let mut on_prediction =
                    |prediction: &Prediction, frame: &VideoFrame| {
                        thread_sink.on_prediction(prediction, frame)
                    };
                match engine.run(&thread_stop, &mut on_prediction) {
                    Ok(()) => info!(
                        engine = engine_name,
                        published = thread_sink.published(),
                        "capture engine finished"
                    ),
                    Err(e) => error!(
                        engine = engine_name,
                        error = %e,
                        "capture engine failed; no further frames will be published"
                    ),
                }
            })
            .map_err(CaptureError::Spawn)?;

        Ok(CaptureHandle { stop, sink, handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BgrImage, EngineError, WorkflowValue};
    use frame_relay_common::frame::FrameStore;
    use std::time::{Duration, Instant};

    /// Replays a fixed list of predictions, then idles until stopped.
    struct ScriptedEngine {
        script: Vec<Prediction>,
        capture_thread: Arc<std::sync::Mutex<Option<String>>>,
    }

    impl InferenceEngine for ScriptedEngine {
        fn run(
            &mut self,
            stop: &AtomicBool,
            on_prediction: &mut dyn FnMut(&Prediction, &VideoFrame),
        ) -> Result<(), EngineError> {
            *self.capture_thread.lock().unwrap() =
                thread::current().name().map(str::to_string);
            for (i, prediction) in self.script.iter().enumerate() {
                let frame = VideoFrame {
                    frame_id: Some(i as u64),
                    ..VideoFrame::default()
                };
                on_prediction(prediction, &frame);
            }
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingEngine;

    impl InferenceEngine for FailingEngine {
        fn run(
            &mut self,
            _stop: &AtomicBool,
            _on_prediction: &mut dyn FnMut(&Prediction, &VideoFrame),
        ) -> Result<(), EngineError> {
            Err(EngineError::Status {
                status: 401,
                body: "invalid api key".into(),
            })
        }
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn predictions_are_published_from_the_capture_thread() {
        let store = Arc::new(FrameStore::new());
        let sink = Arc::new(FrameSink::new(Arc::clone(&store), "output_image"));
        let capture_thread = Arc::new(std::sync::Mutex::new(None));

        let script = (0..3u8)
            .map(|i| {
                let image = BgrImage::new(4, 4, vec![i * 80; 48]);
                Prediction::new().with_output("output_image", WorkflowValue::Image(image))
            })
            .collect();
        let engine = ScriptedEngine {
            script,
            capture_thread: Arc::clone(&capture_thread),
        };

        let handle = CaptureDriver::spawn(engine, sink).unwrap();
        assert!(wait_until(Duration::from_secs(5), || handle.sink().published() == 3));
        assert!(!handle.is_finished());

        let latest = store.read().unwrap();
        assert_eq!(latest.seq, 2);

        handle.stop();
        assert_eq!(
            capture_thread.lock().unwrap().as_deref(),
            Some("frame-capture")
        );
    }

    #[test]
    fn failing_engine_leaves_store_empty() {
        let store = Arc::new(FrameStore::new());
        let sink = Arc::new(FrameSink::new(Arc::clone(&store), "output_image"));

        let handle = CaptureDriver::spawn(FailingEngine, sink).unwrap();
        assert!(wait_until(Duration::from_secs(5), || handle.is_finished()));
        assert!(store.read().is_none());
        handle.stop();
    }
}
