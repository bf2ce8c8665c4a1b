pub mod driver;
pub mod encoder;
pub mod engine;
pub mod pipeline;
pub mod sink;

pub use driver::{CaptureDriver, CaptureError, CaptureHandle};
pub use engine::{BgrImage, EngineError, InferenceEngine, Prediction, VideoFrame, WorkflowValue};
pub use pipeline::RoboflowPipeline;
pub use sink::FrameSink;
