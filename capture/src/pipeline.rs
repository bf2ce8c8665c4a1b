//! Inference engine backed by a Roboflow inference server.
//!
//! The server hosts the actual video pipeline (decoding, workflow execution,
//! visualisation). This client starts a pipeline with an in-memory results
//! sink, then polls that sink at `max_fps` and hands each buffered result to
//! the registered callback.
//!
//! Endpoints used:
//!   POST /inference_pipelines/initialise
//!   GET  /inference_pipelines/{pipeline_id}/consume
//!   POST /inference_pipelines/{pipeline_id}/terminate

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine as _;
use frame_relay_common::config::{RoboflowConfig, VideoReference};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{
    BgrImage, EngineError, InferenceEngine, Prediction, VideoFrame, WorkflowValue,
};

/// Results the server buffers between two consume calls.
const RESULTS_BUFFER_SIZE: usize = 64;

/// How often a pending tick or request re-checks the stop flag.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3600);

pub struct RoboflowPipeline {
    config: RoboflowConfig,
}

#[derive(Debug, Serialize)]
struct InitialiseRequest<'a> {
    api_key: &'a str,
    video_configuration: VideoConfiguration<'a>,
    processing_configuration: WorkflowConfiguration<'a>,
    sink_configuration: MemorySinkConfiguration,
}

#[derive(Debug, Serialize)]
struct VideoConfiguration<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    video_reference: &'a VideoReference,
    max_fps: f64,
}

#[derive(Debug, Serialize)]
struct WorkflowConfiguration<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    workspace_name: &'a str,
    workflow_id: &'a str,
}

#[derive(Debug, Serialize)]
struct MemorySinkConfiguration {
    #[serde(rename = "type")]
    kind: &'static str,
    results_buffer_size: usize,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    context: CommandContext,
}

#[derive(Debug, Deserialize)]
struct CommandContext {
    pipeline_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConsumeResponse {
    #[serde(default)]
    outputs: Vec<Value>,
    #[serde(default)]
    frames_metadata: Vec<FrameMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct FrameMetadata {
    frame_id: Option<u64>,
    source_id: Option<u64>,
    frame_timestamp: Option<String>,
}

impl RoboflowPipeline {
    pub fn new(config: RoboflowConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// `1 / max_fps`, clamped so odd rates can neither panic nor stall the ticker.
    fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.config.max_fps)
            .unwrap_or(MAX_POLL_INTERVAL)
            .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
    }

    fn initialise_request(&self) -> InitialiseRequest<'_> {
        InitialiseRequest {
            api_key: &self.config.api_key,
            video_configuration: VideoConfiguration {
                kind: "VideoConfiguration",
                video_reference: &self.config.video_reference,
                max_fps: self.config.max_fps,
            },
            processing_configuration: WorkflowConfiguration {
                kind: "WorkflowConfiguration",
                workspace_name: &self.config.workspace,
                workflow_id: &self.config.workflow_id,
            },
            sink_configuration: MemorySinkConfiguration {
                kind: "MemorySinkConfiguration",
                results_buffer_size: RESULTS_BUFFER_SIZE,
            },
        }
    }

    async fn initialise(&self, client: &Client) -> Result<String, EngineError> {
        let response = client
            .post(self.endpoint("inference_pipelines/initialise"))
            .json(&self.initialise_request())
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: CommandResponse = response.json().await?;
        body.context
            .pipeline_id
            .ok_or_else(|| EngineError::Decode("initialise response has no pipeline_id".into()))
    }

    async fn consume(
        &self,
        client: &Client,
        pipeline_id: &str,
    ) -> Result<Vec<(Prediction, VideoFrame)>, EngineError> {
        let response = client
            .get(self.endpoint(&format!("inference_pipelines/{pipeline_id}/consume")))
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: ConsumeResponse = response.json().await?;
        Ok(decode_batch(body))
    }

    async fn terminate(&self, client: &Client, pipeline_id: &str) {
        let url = self.endpoint(&format!("inference_pipelines/{pipeline_id}/terminate"));
        match client.post(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(pipeline_id, "inference pipeline terminated");
            }
            Ok(resp) => {
                warn!(pipeline_id, status = %resp.status(), "terminate request rejected");
            }
            Err(e) => {
                warn!(pipeline_id, error = %e, "failed to terminate inference pipeline");
            }
        }
    }

    async fn run_async(
        &self,
        stop: &AtomicBool,
        on_prediction: &mut dyn FnMut(&Prediction, &VideoFrame),
    ) -> Result<(), EngineError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30));
        if is_loopback(&self.config.api_url) {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        info!(
            api_url = self.config.api_url,
            workspace = self.config.workspace,
            workflow_id = self.config.workflow_id,
            video_reference = %self.config.video_reference,
            max_fps = self.config.max_fps,
            "starting inference pipeline"
        );
        let pipeline_id = self.initialise(&client).await?;
        info!(pipeline_id, "inference pipeline started");

        let mut ticker = tokio::time::interval(self.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_requested(stop) => break,
            }
            let result = tokio::select! {
                result = self.consume(&client, &pipeline_id) => result,
                _ = stop_requested(stop) => break,
            };

            match result {
                Ok(batch) => {
                    for (prediction, frame) in &batch {
                        on_prediction(prediction, frame);
                    }
                    total += batch.len() as u64;
                    if !batch.is_empty() {
                        debug!(pipeline_id, batch = batch.len(), total, "consumed results");
                    }
                }
                // The server forgets pipelines that have finished or died.
                Err(e @ EngineError::Status { status: 404, .. }) => return Err(e),
                Err(e) => {
                    warn!(pipeline_id, error = %e, "failed to consume pipeline results");
                }
            }
        }

        self.terminate(&client, &pipeline_id).await;
        Ok(())
    }
}

impl InferenceEngine for RoboflowPipeline {
    fn run(
        &mut self,
        stop: &AtomicBool,
        on_prediction: &mut dyn FnMut(&Prediction, &VideoFrame),
    ) -> Result<(), EngineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(EngineError::Runtime)?;
        runtime.block_on(self.run_async(stop, on_prediction))
    }

    fn name(&self) -> &str {
        "roboflow"
    }
}

/// Resolves once `stop` is set.
async fn stop_requested(stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        tokio::time::sleep(STOP_CHECK_INTERVAL).await;
    }
}

/// A local inference server should never be reached through an env proxy.
fn is_loopback(api_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(api_url) else {
        return false;
    };
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Pair each buffered output with its frame metadata.
fn decode_batch(body: ConsumeResponse) -> Vec<(Prediction, VideoFrame)> {
    let mut metadata = body.frames_metadata.into_iter();
    body.outputs
        .into_iter()
        .map(|output| {
            let meta = metadata.next().unwrap_or_default();
            let frame = VideoFrame {
                frame_id: meta.frame_id,
                source_id: meta.source_id,
                frame_timestamp: meta.frame_timestamp,
            };
            (decode_prediction(output), frame)
        })
        .collect()
}

fn decode_prediction(output: Value) -> Prediction {
    let Value::Object(fields) = output else {
        return Prediction::new();
    };
    let outputs = fields
        .into_iter()
        .map(|(name, value)| {
            let value = match decode_image(&value) {
                Some(image) => WorkflowValue::Image(image),
                None => WorkflowValue::Json(value),
            };
            (name, value)
        })
        .collect();
    Prediction { outputs }
}

/// Decode a serialised workflow image (`{"type": "base64", "value": ...}`)
/// into a BGR buffer. Returns `None` for anything else, including images
/// that fail to decode.
fn decode_image(value: &Value) -> Option<BgrImage> {
    let object = value.as_object()?;
    if object.get("type")?.as_str()? != "base64" {
        return None;
    }
    let encoded = object.get("value")?.as_str()?;
    let raw = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "workflow image is not valid base64");
            return None;
        }
    };
    let rgb = match image::load_from_memory(&raw) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            warn!(error = %e, "failed to decode workflow image");
            return None;
        }
    };

    let (width, height) = rgb.dimensions();
    let mut data = rgb.into_raw();
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    Some(BgrImage::new(width, height, data))
}
