use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use frame_relay_common::frame::FrameStore;
use tracing::{debug, warn};

use crate::encoder::{encode_jpeg, JPEG_QUALITY};
use crate::engine::{Prediction, VideoFrame};

/// Per-frame callback that publishes a workflow's annotated image.
///
/// Predictions without an image under `output_field` are ignored. Encode
/// failures are logged and counted; the previously published frame stays
/// current.
pub struct FrameSink {
    store: Arc<FrameStore>,
    output_field: String,
    quality: u8,
    published: AtomicU64,
    encode_failures: AtomicU64,
}

impl FrameSink {
    pub fn new(store: Arc<FrameStore>, output_field: impl Into<String>) -> Self {
        Self {
            store,
            output_field: output_field.into(),
            quality: JPEG_QUALITY,
            published: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
        }
    }

    pub fn on_prediction(&self, prediction: &Prediction, _frame: &VideoFrame) {
        let Some(image) = prediction.image(&self.output_field) else {
            return;
        };

        let jpeg = match encode_jpeg(image, self.quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                let failures = self.encode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    error = %e,
                    width = image.width,
                    height = image.height,
                    failures,
                    "failed to encode frame, keeping previous"
                );
                return;
            }
        };

        let bytes = jpeg.len();
        let seq = self.store.publish(jpeg);
        let total = self.published.fetch_add(1, Ordering::Relaxed) + 1;
        if total % 100 == 0 {
            debug!(total, seq, bytes, "frames published");
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn encode_failures(&self) -> u64 {
        self.encode_failures.load(Ordering::Relaxed)
    }
}
