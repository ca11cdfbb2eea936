use crate::config::Config;
use facegate_core::detector::{Capability, DetectorChain};
use facegate_core::embedding::{EmbeddingError, EmbeddingPipeline};
use facegate_core::frame::{self, Frame};
use facegate_core::liveness::{LivenessAssessor, LivenessResult};
use facegate_core::matcher::{self, MatchResult, Metric};
use facegate_core::quality::{QualityScore, QualityScorer};
use facegate_core::{Detection, DetectorKind, Embedding, FaceTemplate, Guidance, Landmarks};
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Real-time ticks whose landmarks are kept for the motion sub-check.
const LANDMARK_HISTORY: usize = 8;
/// Share of near-black pixels above which a capture is rejected as dark.
const DARK_FRAME_THRESHOLD: f32 = 0.95;
const REQUEST_QUEUE: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("no face found")]
    NoFaceFound,
    #[error("face quality {overall:.2} below required minimum")]
    LowQuality { overall: f32, feedback: Vec<Guidance> },
    #[error("liveness check failed (score {score:.2})")]
    LivenessRejected { score: f32 },
    #[error("no enrolled template matched (best similarity {best_similarity:.2})")]
    MatchNotFound { best_similarity: f32 },
    #[error("embedding error: {0}")]
    Embedding(EmbeddingError),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<EmbeddingError> for EngineError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::InvalidImage(msg) => Self::InvalidImage(msg),
            other => Self::Embedding(other),
        }
    }
}

/// Best detection in a frame and its quality.
#[derive(Debug, Clone, Serialize)]
pub struct FaceAnalysis {
    pub detection: Detection,
    pub quality: QualityScore,
}

impl FaceAnalysis {
    pub fn feedback(&self) -> &[Guidance] {
        &self.quality.feedback
    }
}

/// Outcome of a capture-time embedding request.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    /// A descriptor was produced for a live face.
    pub success: bool,
    /// `None` when the liveness check rejected the capture.
    pub embedding: Option<Embedding>,
    /// Confidence of the detection the descriptor was taken from.
    pub confidence: f32,
    pub liveness: LivenessResult,
}

/// Accepted identity from a full verification.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub owner_id: String,
    pub matched_index: usize,
    pub similarity: f32,
    pub detection: Detection,
    pub quality: QualityScore,
    pub liveness: LivenessResult,
    pub matches: MatchResult,
}

/// What the engine was built with.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub capability: Capability,
    pub tiers: Vec<DetectorKind>,
    pub embedding_model: bool,
}

/// Models and scorers owned by the engine thread.
pub struct Pipeline {
    pub chain: DetectorChain,
    pub scorer: QualityScorer,
    pub liveness: LivenessAssessor,
    pub embedder: EmbeddingPipeline,
}

impl Pipeline {
    /// Load every configured model. Missing models disable their tier.
    pub fn from_config(config: &Config) -> Self {
        let chain = DetectorChain::from_config(&config.chain_config());
        let model_path = config.embedding_model_path();
        let embedder = EmbeddingPipeline::from_model_path(
            config.image_gate(),
            config.embedding_model.then_some(model_path.as_path()),
        );
        Self::with_parts(chain, embedder, config)
    }

    /// Wrap a prebuilt chain; descriptors come from the luminance grid.
    pub fn with_chain(chain: DetectorChain, config: &Config) -> Self {
        let embedder = EmbeddingPipeline::new(config.image_gate(), None);
        Self::with_parts(chain, embedder, config)
    }

    fn with_parts(chain: DetectorChain, embedder: EmbeddingPipeline, config: &Config) -> Self {
        Self {
            chain,
            scorer: QualityScorer::new(config.weights.clone()),
            liveness: LivenessAssessor::new(config.liveness_config()),
            embedder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnalyzeMode {
    /// Real-time tick: landmarks feed the motion history.
    Tick,
    Capture,
    BestEffort,
}

enum EngineRequest {
    Analyze {
        frame: Frame,
        mode: AnalyzeMode,
        reply: oneshot::Sender<Option<FaceAnalysis>>,
    },
    Extract {
        frame: Frame,
        reply: oneshot::Sender<Result<ExtractionResult, EngineError>>,
    },
    Verify {
        frame: Frame,
        templates: Vec<FaceTemplate>,
        enforce_quality: bool,
        reply: oneshot::Sender<Result<Verdict, EngineError>>,
    },
    ResetHistory,
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Single-shot detection plus quality. `Ok(None)` when no face was found.
    pub async fn detect_face_with_quality(&self, frame: Frame) -> Result<Option<FaceAnalysis>, EngineError> {
        self.analyze(frame, AnalyzeMode::Capture).await
    }

    /// Like [`detect_face_with_quality`](Self::detect_face_with_quality), but an
    /// exhausted chain yields the synthetic centered box when that tier is enabled.
    pub async fn detect_face_best_effort(&self, frame: Frame) -> Result<Option<FaceAnalysis>, EngineError> {
        self.analyze(frame, AnalyzeMode::BestEffort).await
    }

    /// One real-time tick. Landmarks of the result are remembered for liveness.
    pub(crate) async fn analyze_tick(&self, frame: Frame) -> Result<Option<FaceAnalysis>, EngineError> {
        self.analyze(frame, AnalyzeMode::Tick).await
    }

    async fn analyze(&self, frame: Frame, mode: AnalyzeMode) -> Result<Option<FaceAnalysis>, EngineError> {
        self.request(|reply| EngineRequest::Analyze { frame, mode, reply })
            .await
    }

    /// Detect, check liveness and compute a descriptor for enrollment or matching.
    pub async fn extract_embedding(&self, frame: Frame) -> Result<ExtractionResult, EngineError> {
        self.request(|reply| EngineRequest::Extract { frame, reply })
            .await?
    }

    /// Full one-shot verification against enrolled templates.
    pub async fn verify(
        &self,
        frame: Frame,
        templates: Vec<FaceTemplate>,
        enforce_quality: bool,
    ) -> Result<Verdict, EngineError> {
        self.request(|reply| EngineRequest::Verify {
            frame,
            templates,
            enforce_quality,
            reply,
        })
        .await?
    }

    /// Forget landmark history from earlier ticks.
    pub async fn reset_history(&self) -> Result<(), EngineError> {
        self.tx
            .send(EngineRequest::ResetHistory)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine, loading models on the engine thread.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let build_config = config.clone();
    spawn_engine_with(config, move || Pipeline::from_config(&build_config))
}

/// Spawn the engine with a caller-supplied pipeline builder.
///
/// The builder runs on the engine thread, so detectors need not be `Send`.
pub fn spawn_engine_with<F>(config: &Config, build: F) -> Result<EngineHandle, EngineError>
where
    F: FnOnce() -> Pipeline + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(REQUEST_QUEUE);
    let settings = Settings::from(config);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            let mut engine = Engine {
                pipeline: build(),
                settings,
                history: VecDeque::with_capacity(LANDMARK_HISTORY),
            };
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { frame, mode, reply } => {
                        let _ = reply.send(engine.analyze(&frame, mode));
                    }
                    EngineRequest::Extract { frame, reply } => {
                        let _ = reply.send(engine.extract(&frame));
                    }
                    EngineRequest::Verify {
                        frame,
                        templates,
                        enforce_quality,
                        reply,
                    } => {
                        let _ = reply.send(engine.verify(&frame, &templates, enforce_quality));
                    }
                    EngineRequest::ResetHistory => engine.history.clear(),
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(engine.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[derive(Debug, Clone)]
struct Settings {
    min_quality: f32,
    match_threshold: f32,
    metric: Metric,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            min_quality: config.min_quality,
            match_threshold: config.match_threshold,
            metric: config.match_metric,
        }
    }
}

struct Engine {
    pipeline: Pipeline,
    settings: Settings,
    history: VecDeque<Landmarks>,
}

impl Engine {
    fn analyze(&mut self, frame: &Frame, mode: AnalyzeMode) -> Option<FaceAnalysis> {
        let force = mode == AnalyzeMode::BestEffort;
        let detection = self.pipeline.chain.detect(frame, force).into_iter().next();

        if mode == AnalyzeMode::Tick {
            match detection.as_ref().and_then(|d| d.landmarks) {
                Some(lms) => {
                    if self.history.len() == LANDMARK_HISTORY {
                        self.history.pop_front();
                    }
                    self.history.push_back(lms);
                }
                None if detection.is_none() => self.history.clear(),
                None => {}
            }
        }

        let detection = detection?;
        let quality = self.pipeline.scorer.score(&detection, frame);
        Some(FaceAnalysis { detection, quality })
    }

    /// Reject empty, undersized and dark frames, then find the best face without
    /// the synthetic fallback.
    fn capture_face(&mut self, frame: &Frame) -> Result<Detection, EngineError> {
        if frame.is_empty() {
            return Err(EngineError::InvalidImage("empty frame".into()));
        }
        let min = self.pipeline.embedder.gate().min_image_size;
        if frame.width < min || frame.height < min {
            return Err(EngineError::InvalidImage(format!(
                "image {}x{} below minimum {min}x{min}",
                frame.width, frame.height
            )));
        }
        if frame::is_dark_frame(&frame.to_luma(), DARK_FRAME_THRESHOLD) {
            return Err(EngineError::InvalidImage("frame too dark".into()));
        }
        self.pipeline
            .chain
            .detect(frame, false)
            .into_iter()
            .next()
            .ok_or(EngineError::NoFaceFound)
    }

    fn history(&self) -> Vec<Landmarks> {
        self.history.iter().copied().collect()
    }

    fn extract(&mut self, frame: &Frame) -> Result<ExtractionResult, EngineError> {
        let detection = self.capture_face(frame)?;
        let liveness = self.pipeline.liveness.assess(frame, &detection, &self.history());

        if !liveness.is_live {
            tracing::info!(score = liveness.score, "extract: liveness rejected");
            return Ok(ExtractionResult {
                success: false,
                embedding: None,
                confidence: detection.confidence,
                liveness,
            });
        }

        let embedding = self.pipeline.embedder.extract(frame, &detection)?;
        tracing::info!(
            confidence = detection.confidence,
            extractor = embedding.model_version.as_deref().unwrap_or("unknown"),
            "extract: descriptor computed"
        );
        Ok(ExtractionResult {
            success: true,
            embedding: Some(embedding),
            confidence: detection.confidence,
            liveness,
        })
    }

    fn verify(
        &mut self,
        frame: &Frame,
        templates: &[FaceTemplate],
        enforce_quality: bool,
    ) -> Result<Verdict, EngineError> {
        let detection = self.capture_face(frame)?;
        let quality = self.pipeline.scorer.score(&detection, frame);
        if enforce_quality && quality.overall < self.settings.min_quality {
            tracing::info!(overall = quality.overall, "verify: quality below minimum");
            return Err(EngineError::LowQuality {
                overall: quality.overall,
                feedback: quality.feedback,
            });
        }

        let liveness = self.pipeline.liveness.assess(frame, &detection, &self.history());
        if !liveness.is_live {
            tracing::info!(score = liveness.score, "verify: liveness rejected");
            return Err(EngineError::LivenessRejected { score: liveness.score });
        }

        let embedding = self.pipeline.embedder.extract(frame, &detection)?;
        let matches =
            matcher::find_best_match_with(self.settings.metric.matcher(), &embedding.values, templates);

        match matches.accepted(self.settings.match_threshold) {
            Some(index) => {
                tracing::info!(
                    owner = %templates[index].owner_id,
                    similarity = matches.best_similarity,
                    "verify: match accepted"
                );
                Ok(Verdict {
                    owner_id: templates[index].owner_id.clone(),
                    matched_index: index,
                    similarity: matches.best_similarity,
                    detection,
                    quality,
                    liveness,
                    matches,
                })
            }
            None => {
                tracing::info!(
                    best_similarity = matches.best_similarity,
                    templates = templates.len(),
                    "verify: no match"
                );
                Err(EngineError::MatchNotFound {
                    best_similarity: matches.best_similarity,
                })
            }
        }
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            capability: self.pipeline.chain.capability(),
            tiers: self.pipeline.chain.tier_kinds(),
            embedding_model: self.pipeline.embedder.has_model(),
        }
    }
}
