use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

/// A decoded image in blue-green-red byte order, tightly packed
/// (`width * height * 3` bytes, no row padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl BgrImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Byte length a well-formed buffer of these dimensions must have.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// One value produced by a workflow output.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowValue {
    Image(BgrImage),
    Json(serde_json::Value),
}

/// Result payload for a single processed video frame, keyed by workflow
/// output name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    pub outputs: BTreeMap<String, WorkflowValue>,
}

impl Prediction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, name: impl Into<String>, value: WorkflowValue) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    /// The image stored under `name`, if that output exists and is an image.
    pub fn image(&self, name: &str) -> Option<&BgrImage> {
        match self.outputs.get(name) {
            Some(WorkflowValue::Image(image)) => Some(image),
            _ => None,
        }
    }
}

/// Metadata for the raw video frame a prediction was computed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFrame {
    pub frame_id: Option<u64>,
    pub source_id: Option<u64>,
    pub frame_timestamp: Option<String>,
}

/// Something that turns a video source into a stream of predictions.
///
/// `run` blocks the calling thread, invoking `on_prediction` once per
/// processed frame on that same thread. It returns when the source is
/// exhausted, when start-up or processing fails, or soon after `stop` is set.
pub trait InferenceEngine: Send + 'static {
    fn run(
        &mut self,
        stop: &AtomicBool,
        on_prediction: &mut dyn FnMut(&Prediction, &VideoFrame),
    ) -> Result<(), EngineError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to build async runtime: {0}")]
    Runtime(std::io::Error),
    #[error("inference server request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("inference server returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected inference server response: {0}")]
    Decode(String),
}
