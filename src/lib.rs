//! # tamperscope — Check Image Forensics Engine
//!
//! Determines, from pixel data alone, whether a check image shows signs of
//! digital tampering. The engine fans three independent analyses out to a
//! bounded worker pool and folds their scores into a single fraud-risk
//! signal.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     ForensicsEngine                        │
//! │  ┌────────────┐  ┌───────────────┐  ┌──────────────────┐  │
//! │  │ Edge/Tamper│  │ Compression   │  │ Font/Text        │  │
//! │  │ continuity │  │ block DCT     │  │ region segments  │  │
//! │  │ copy-move  │  │ ELA           │  │ stroke width     │  │
//! │  │ noise model│  │ recompression │  │ alignment        │  │
//! │  └─────┬──────┘  └──────┬────────┘  └────────┬─────────┘  │
//! │        │                │                    │            │
//! │  ┌─────▼────────────────▼────────────────────▼─────────┐  │
//! │  │  Worker pool (bounded, min(4, cores)) fan-out/join  │  │
//! │  └──────────────────────────┬──────────────────────────┘  │
//! │                             │                             │
//! │  ┌──────────────────────────▼──────────────────────────┐  │
//! │  │ Weighted score → anomalies → failure-tier policy    │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The core safety invariant: a broken detector reports **maximum**
//! suspicion, never silence. A failed analysis can elevate the overall
//! score to 1.0 but can never lower it below what the surviving analyses
//! computed.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tamperscope::{EngineConfig, ForensicsEngine, ImageBuffer};
//!
//! let image = ImageBuffer::new(width, height, 3, pixels)?;
//! let engine = ForensicsEngine::with_global_pool(EngineConfig::default())?;
//! let result = engine.analyze(image)?;
//! println!("overall risk: {:.2}", result.overall_score);
//! ```

pub mod analysis;
pub mod engine;
pub mod pixels;

pub use analysis::{
    AnalysisStatus, CompressionReport, EdgeReport, ElaReport, FontReport, NoiseReport,
    SuspiciousRegion,
};
pub use engine::pool::{WorkerPool, WorkerPoolHandle};
pub use engine::{EngineConfig, ForensicsEngine, ForensicsResult};
pub use pixels::{GrayImage, ImageBuffer};

use thiserror::Error;

/// Failure taxonomy for the forensics engine.
///
/// `ImageDecode` and `FeatureDetection` are fatal-class: the image itself
/// could not be interpreted, so no score derived from it can be trusted.
/// `CompressionAnalysis` and `Processing` are warning-class: one stage
/// misbehaved and a recovery pass may still salvage the call.
#[derive(Error, Debug, Clone)]
pub enum ForensicsError {
    #[error("image decode failure: {0}")]
    ImageDecode(String),

    #[error("feature detection failure: {0}")]
    FeatureDetection(String),

    #[error("compression analysis failure: {0}")]
    CompressionAnalysis(String),

    #[error("processing failure: {0}")]
    Processing(String),

    #[error("worker pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("analysis timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ForensicsError {
    /// Whether this failure escalates straight to `CriticalFailure`.
    ///
    /// Fatal-class failures mean the input (or the infrastructure under it)
    /// is unusable; warning-class failures are retried once before the
    /// per-component fallback score kicks in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ImageDecode(_)
                | Self::FeatureDetection(_)
                | Self::PoolUnavailable(_)
                | Self::Timeout { .. }
                | Self::InvalidInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ForensicsError>;
