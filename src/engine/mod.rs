//! Forensics orchestration: fan the three analyses out over the worker
//! pool, join them against one deadline, and fold the outcomes through
//! the failure-tier policy.
//!
//! The policy's one invariant: a broken detector reports maximum
//! suspicion, never silence. Any fatal failure yields a well-formed
//! result with every score at 1.0; recoverable failures degrade to
//! conservative fallbacks with a floored overall score.

pub mod pool;

use crate::analysis::{
    self, AnalysisStatus, CompressionReport, EdgeReport, ElaReport, FontReport, NoiseReport,
    SuspiciousRegion,
};
use crate::pixels::ImageBuffer;
use crate::{ForensicsError, Result};
use pool::WorkerPoolHandle;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const WEIGHT_EDGE: f64 = 0.4;
const WEIGHT_COMPRESSION: f64 = 0.3;
const WEIGHT_FONT: f64 = 0.3;

const EDGE_ANOMALY_BELOW: f64 = 0.3;
const COMPRESSION_ANOMALY_ABOVE: f64 = 0.7;
const CLONE_ANOMALY_ABOVE: f64 = 0.5;

const PARTIAL_FALLBACK_SCORE: f64 = 0.8;
const PARTIAL_OVERALL_FLOOR: f64 = 0.7;

const CRITICAL_ANOMALY: &str = "Critical analysis failure - high risk";
const PARTIAL_ANOMALY: &str = "Partial analysis failure - elevated risk";

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Images larger than this on either side are downscaled before
    /// analysis (area averaging, aspect ratio kept).
    pub max_dimension: usize,
    /// Deadline for the whole three-job batch.
    pub timeout: Duration,
    /// Re-encode quality for Error Level Analysis.
    pub jpeg_quality: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_dimension: 2048,
            timeout: Duration::from_secs(120),
            jpeg_quality: 85,
        }
    }
}

/// Complete outcome of one analysis call. Always well-formed: consumers
/// branch on `analysis_status`, never on missing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForensicsResult {
    pub edge_score: f64,
    pub compression_score: f64,
    pub font_score: f64,
    /// `0.4·edge + 0.3·compression + 0.3·font`, floored at 0.7 for
    /// partial failures, forced to 1.0 for critical ones.
    pub overall_score: f64,
    pub detected_anomalies: Vec<String>,
    pub edge_inconsistencies: EdgeReport,
    pub compression_artifacts: CompressionReport,
    pub font_analysis: FontReport,
    pub analysis_status: AnalysisStatus,
    /// Present iff status is not `Success`.
    pub error_details: Option<String>,
    pub ela_analysis: Option<ElaReport>,
    pub copy_move_regions: Option<Vec<SuspiciousRegion>>,
    pub noise_analysis: Option<NoiseReport>,
}

type Outcomes = (
    Result<EdgeReport>,
    Result<CompressionReport>,
    Result<FontReport>,
);

enum Tier {
    Clean,
    Recoverable,
    Fatal(String),
}

/// Stateless per-call orchestrator over an injected worker pool.
pub struct ForensicsEngine {
    pool: WorkerPoolHandle,
    config: EngineConfig,
}

impl ForensicsEngine {
    pub fn new(pool: WorkerPoolHandle, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    /// Convenience constructor on the process-wide pool.
    pub fn with_global_pool(config: EngineConfig) -> Result<Self> {
        Ok(Self::new(pool::get_executor()?, config))
    }

    /// Analyze one image for tampering.
    ///
    /// The only raw error path is `InvalidInput` (a mis-shaped buffer is
    /// a caller bug). Every analysis failure, including timeouts and
    /// pool loss, comes back as a well-formed result whose status and
    /// scores encode the failure.
    pub fn analyze(&self, image: ImageBuffer) -> Result<ForensicsResult> {
        image.validate()?;
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        let prepared = image.downscale_area(self.config.max_dimension);
        tracing::info!(
            width = prepared.width,
            height = prepared.height,
            downscaled = prepared.width != image.width,
            "forensics analysis started"
        );

        let outcomes = self.run_batch(&prepared, deadline, [true, true, true]);
        let result = self.resolve(&prepared, outcomes, deadline);

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            status = %result.analysis_status,
            overall = result.overall_score,
            anomalies = result.detected_anomalies.len(),
            "forensics analysis complete"
        );
        Ok(result)
    }

    /// Submit the selected analyses (edge, compression, font) and join
    /// them against the shared deadline. Unselected slots reuse nothing
    /// here; callers splice prior successes back in.
    fn run_batch(&self, prepared: &ImageBuffer, deadline: Instant, run: [bool; 3]) -> Outcomes {
        fn skipped<T>() -> Result<T> {
            Err(ForensicsError::Processing("analysis not scheduled".into()))
        }

        let edge_handle = run[0].then(|| {
            let img = prepared.clone();
            self.pool.submit(move || analysis::edge::analyze(&img))
        });
        let comp_handle = run[1].then(|| {
            let img = prepared.clone();
            let quality = self.config.jpeg_quality;
            self.pool.submit(move || analysis::compression::analyze(&img, quality))
        });
        let font_handle = run[2].then(|| {
            let img = prepared.clone();
            self.pool.submit(move || analysis::font::analyze(&img))
        });

        let edge = edge_handle.map_or_else(skipped, |h| {
            h.and_then(|handle| handle.join_deadline(deadline))
        });
        let compression = comp_handle.map_or_else(skipped, |h| {
            h.and_then(|handle| handle.join_deadline(deadline))
        });
        let font = font_handle.map_or_else(skipped, |h| {
            h.and_then(|handle| handle.join_deadline(deadline))
        });
        (edge, compression, font)
    }

    /// Fold the three outcomes through the failure tiers.
    fn resolve(&self, prepared: &ImageBuffer, outcomes: Outcomes, deadline: Instant) -> ForensicsResult {
        match classify(&outcomes) {
            Tier::Fatal(detail) => {
                tracing::error!(%detail, "fatal analysis failure");
                critical_result(detail)
            }
            Tier::Clean => {
                let (edge, compression, font) = outcomes;
                // Clean tier: all three are Ok by classification.
                match (edge, compression, font) {
                    (Ok(e), Ok(c), Ok(f)) => success_result(e, c, f),
                    _ => critical_result("inconsistent outcome classification".into()),
                }
            }
            Tier::Recoverable => self.recover(prepared, outcomes, deadline),
        }
    }

    /// One recovery pass: successful sub-results are kept, failed ones
    /// re-run once. A fatal error during recovery escalates; a repeat
    /// recoverable failure degrades that component to the fallback score.
    fn recover(&self, prepared: &ImageBuffer, outcomes: Outcomes, deadline: Instant) -> ForensicsResult {
        let (edge, compression, font) = outcomes;
        let rerun = [edge.is_err(), compression.is_err(), font.is_err()];
        let mut details: Vec<String> = Vec::new();
        for err in [
            edge.as_ref().err(),
            compression.as_ref().err(),
            font.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        {
            details.push(err.to_string());
        }
        tracing::warn!(
            edge = rerun[0],
            compression = rerun[1],
            font = rerun[2],
            "recoverable failure, re-running failed analyses"
        );

        let (edge_retry, comp_retry, font_retry) = self.run_batch(prepared, deadline, rerun);
        let edge = edge.or(edge_retry);
        let compression = compression.or(comp_retry);
        let font = font.or(font_retry);

        for err in [
            edge.as_ref().err(),
            compression.as_ref().err(),
            font.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        {
            if err.is_fatal() {
                tracing::error!(error = %err, "recovery escalated to critical");
                return critical_result(err.to_string());
            }
        }

        partial_result(edge, compression, font, details.join("; "))
    }
}

// ─── Tier policy (pure, unit-tested directly) ──────────────────────

fn classify(outcomes: &Outcomes) -> Tier {
    let errors: Vec<&ForensicsError> = [
        outcomes.0.as_ref().err(),
        outcomes.1.as_ref().err(),
        outcomes.2.as_ref().err(),
    ]
    .into_iter()
    .flatten()
    .collect();

    if let Some(fatal) = errors.iter().find(|e| e.is_fatal()) {
        return Tier::Fatal(fatal.to_string());
    }
    if errors.is_empty() {
        Tier::Clean
    } else {
        Tier::Recoverable
    }
}

fn anomalies_for(
    edge_score: f64,
    compression_score: f64,
    font: &FontReport,
    copy_move_score: f64,
) -> Vec<String> {
    let mut anomalies = Vec::new();
    if edge_score < EDGE_ANOMALY_BELOW {
        anomalies.push("poor edge continuity".to_string());
    }
    if compression_score > COMPRESSION_ANOMALY_ABOVE {
        anomalies.push("high compression artifacts".to_string());
    }
    anomalies.extend(font.inconsistencies.iter().cloned());
    if copy_move_score > CLONE_ANOMALY_ABOVE {
        anomalies.push("potential cloned regions".to_string());
    }
    anomalies
}

fn success_result(
    edge: EdgeReport,
    compression: CompressionReport,
    font: FontReport,
) -> ForensicsResult {
    let overall = WEIGHT_EDGE * edge.score
        + WEIGHT_COMPRESSION * compression.score
        + WEIGHT_FONT * font.score;
    let anomalies = anomalies_for(edge.score, compression.score, &font, edge.copy_move_score);
    ForensicsResult {
        edge_score: edge.score,
        compression_score: compression.score,
        font_score: font.score,
        overall_score: overall,
        detected_anomalies: anomalies,
        ela_analysis: Some(compression.ela.clone()),
        copy_move_regions: Some(edge.copy_move_regions.clone()),
        noise_analysis: Some(edge.noise.clone()),
        edge_inconsistencies: edge,
        compression_artifacts: compression,
        font_analysis: font,
        analysis_status: AnalysisStatus::Success,
        error_details: None,
    }
}

fn partial_result(
    edge: Result<EdgeReport>,
    compression: Result<CompressionReport>,
    font: Result<FontReport>,
    detail: String,
) -> ForensicsResult {
    let edge = edge.unwrap_or_else(|_| EdgeReport::fallback(PARTIAL_FALLBACK_SCORE));
    let compression =
        compression.unwrap_or_else(|_| CompressionReport::fallback(PARTIAL_FALLBACK_SCORE));
    let font = font.unwrap_or_else(|_| FontReport::fallback(PARTIAL_FALLBACK_SCORE));

    let weighted = WEIGHT_EDGE * edge.score
        + WEIGHT_COMPRESSION * compression.score
        + WEIGHT_FONT * font.score;
    let overall = weighted.max(PARTIAL_OVERALL_FLOOR);

    let mut anomalies =
        anomalies_for(edge.score, compression.score, &font, edge.copy_move_score);
    anomalies.push(PARTIAL_ANOMALY.to_string());

    ForensicsResult {
        edge_score: edge.score,
        compression_score: compression.score,
        font_score: font.score,
        overall_score: overall,
        detected_anomalies: anomalies,
        ela_analysis: Some(compression.ela.clone()),
        copy_move_regions: Some(edge.copy_move_regions.clone()),
        noise_analysis: Some(edge.noise.clone()),
        edge_inconsistencies: edge,
        compression_artifacts: compression,
        font_analysis: font,
        analysis_status: AnalysisStatus::PartialFailure,
        error_details: Some(detail),
    }
}

fn critical_result(detail: String) -> ForensicsResult {
    ForensicsResult {
        edge_score: 1.0,
        compression_score: 1.0,
        font_score: 1.0,
        overall_score: 1.0,
        detected_anomalies: vec![CRITICAL_ANOMALY.to_string()],
        edge_inconsistencies: EdgeReport::fallback(1.0),
        compression_artifacts: CompressionReport::fallback(1.0),
        font_analysis: FontReport::fallback(1.0),
        analysis_status: AnalysisStatus::CriticalFailure,
        error_details: Some(detail),
        ela_analysis: None,
        copy_move_regions: None,
        noise_analysis: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pool::WorkerPool;

    fn ok_outcomes() -> Outcomes {
        (
            Ok(EdgeReport { score: 0.2, ..Default::default() }),
            Ok(CompressionReport { score: 0.4, ..Default::default() }),
            Ok(FontReport { score: 0.9, ..Default::default() }),
        )
    }

    #[test]
    fn test_classify_all_ok_is_clean() {
        assert!(matches!(classify(&ok_outcomes()), Tier::Clean));
    }

    #[test]
    fn test_classify_fatal_dominates_recoverable() {
        let outcomes: Outcomes = (
            Err(ForensicsError::FeatureDetection("no keypoints".into())),
            Err(ForensicsError::CompressionAnalysis("bad block".into())),
            Ok(FontReport::default()),
        );
        match classify(&outcomes) {
            Tier::Fatal(detail) => assert!(detail.contains("no keypoints")),
            _ => panic!("fatal error must classify as Fatal"),
        }
    }

    #[test]
    fn test_classify_recoverable_only() {
        let outcomes: Outcomes = (
            Ok(EdgeReport::default()),
            Err(ForensicsError::CompressionAnalysis("bad block".into())),
            Ok(FontReport::default()),
        );
        assert!(matches!(classify(&outcomes), Tier::Recoverable));
    }

    #[test]
    fn test_timeout_is_fatal_class() {
        let outcomes: Outcomes = (
            Err(ForensicsError::Timeout { elapsed_ms: 120_000 }),
            Ok(CompressionReport::default()),
            Ok(FontReport::default()),
        );
        match classify(&outcomes) {
            Tier::Fatal(detail) => assert!(detail.contains("timed out")),
            _ => panic!("timeout must be fatal"),
        }
    }

    #[test]
    fn test_critical_result_forces_maximum_suspicion() {
        let result = critical_result("decode exploded".into());
        assert_eq!(result.analysis_status, AnalysisStatus::CriticalFailure);
        assert_eq!(result.edge_score, 1.0);
        assert_eq!(result.compression_score, 1.0);
        assert_eq!(result.font_score, 1.0);
        assert_eq!(result.overall_score, 1.0);
        assert_eq!(result.detected_anomalies, vec![CRITICAL_ANOMALY.to_string()]);
        assert_eq!(result.error_details.as_deref(), Some("decode exploded"));
        assert!(result.ela_analysis.is_none());
    }

    #[test]
    fn test_success_result_weights_scores() {
        let (e, c, f) = ok_outcomes();
        let result = success_result(e.unwrap(), c.unwrap(), f.unwrap());
        let expected = 0.4 * 0.2 + 0.3 * 0.4 + 0.3 * 0.9;
        assert!((result.overall_score - expected).abs() < 1e-12);
        assert_eq!(result.analysis_status, AnalysisStatus::Success);
        assert!(result.error_details.is_none());
        // edge 0.2 < 0.3 threshold
        assert!(result.detected_anomalies.iter().any(|a| a == "poor edge continuity"));
    }

    #[test]
    fn test_partial_result_floors_overall_and_uses_fallback() {
        let result = partial_result(
            Ok(EdgeReport { score: 0.1, ..Default::default() }),
            Err(ForensicsError::CompressionAnalysis("still broken".into())),
            Ok(FontReport { score: 0.2, ..Default::default() }),
            "compression analysis failure: still broken".into(),
        );
        assert_eq!(result.analysis_status, AnalysisStatus::PartialFailure);
        assert_eq!(result.compression_score, PARTIAL_FALLBACK_SCORE);
        assert_eq!(result.overall_score, PARTIAL_OVERALL_FLOOR);
        assert!(result.detected_anomalies.iter().any(|a| a == PARTIAL_ANOMALY));
        assert!(result.error_details.is_some());
        assert_eq!(
            result.compression_artifacts.extra.get("fallback"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn test_partial_overall_not_floored_when_weighted_is_higher() {
        let result = partial_result(
            Ok(EdgeReport { score: 0.9, ..Default::default() }),
            Err(ForensicsError::Processing("x".into())),
            Ok(FontReport { score: 0.9, ..Default::default() }),
            "x".into(),
        );
        let weighted = 0.4 * 0.9 + 0.3 * PARTIAL_FALLBACK_SCORE + 0.3 * 0.9;
        assert!((result.overall_score - weighted).abs() < 1e-12);
        assert!(result.overall_score > PARTIAL_OVERALL_FLOOR);
    }

    #[test]
    fn test_anomaly_rules() {
        let font = FontReport {
            inconsistencies: vec!["high stroke width variation".into()],
            ..Default::default()
        };
        let anomalies = anomalies_for(0.2, 0.8, &font, 0.6);
        assert_eq!(
            anomalies,
            vec![
                "poor edge continuity".to_string(),
                "high compression artifacts".to_string(),
                "high stroke width variation".to_string(),
                "potential cloned regions".to_string(),
            ]
        );
        assert!(anomalies_for(0.5, 0.5, &FontReport::default(), 0.1).is_empty());
    }

    #[test]
    fn test_analyze_rejects_invalid_buffer() {
        let pool = WorkerPool::spawn(2).unwrap();
        let engine = ForensicsEngine::new(pool.clone(), EngineConfig::default());
        let bad = ImageBuffer {
            width: 4,
            height: 4,
            channels: 3,
            data: vec![0u8; 7],
        };
        let err = engine.analyze(bad).unwrap_err();
        assert!(matches!(err, ForensicsError::InvalidInput(_)));
        pool.shutdown(true);
    }

    #[test]
    fn test_analyze_tiny_image_is_critical_not_err() {
        let pool = WorkerPool::spawn(2).unwrap();
        let engine = ForensicsEngine::new(pool.clone(), EngineConfig::default());
        let tiny = ImageBuffer::from_gray(8, 8, vec![128; 64]).unwrap();
        let result = engine.analyze(tiny).unwrap();
        assert_eq!(result.analysis_status, AnalysisStatus::CriticalFailure);
        assert_eq!(result.overall_score, 1.0);
        assert!(result.error_details.is_some());
        pool.shutdown(true);
    }

    #[test]
    fn test_recover_keeps_successes_and_reruns_only_the_failure() {
        let pool = WorkerPool::spawn(2).unwrap();
        let engine = ForensicsEngine::new(pool.clone(), EngineConfig::default());
        let prepared = ImageBuffer::from_gray(64, 64, vec![150; 64 * 64]).unwrap();
        let outcomes: Outcomes = (
            Ok(EdgeReport { score: 0.25, ..Default::default() }),
            Err(ForensicsError::Processing("transient worker fault".into())),
            Ok(FontReport { score: 0.75, ..Default::default() }),
        );

        let result = engine.recover(&prepared, outcomes, Instant::now() + Duration::from_secs(30));

        assert_eq!(result.analysis_status, AnalysisStatus::PartialFailure);
        assert_eq!(result.edge_score, 0.25, "first-pass edge result must be reused as-is");
        assert_eq!(result.font_score, 0.75, "first-pass font result must be reused as-is");
        // The re-run succeeded on the real image, so the compression
        // report is computed, not the imposed fallback.
        assert!(result.compression_artifacts.extra.get("fallback").is_none());
        assert!((0.0..=1.0).contains(&result.compression_score));
        assert!(
            result.error_details.as_deref().unwrap().contains("transient worker fault"),
            "first-pass failure must be recorded: {:?}",
            result.error_details
        );
        pool.shutdown(true);
    }

    #[test]
    fn test_recover_escalates_when_retry_hits_fatal() {
        let pool = WorkerPool::spawn(2).unwrap();
        let engine = ForensicsEngine::new(pool.clone(), EngineConfig::default());
        // Too small for edge analysis: the edge re-run fails fatally.
        let prepared = ImageBuffer::from_gray(8, 8, vec![128; 64]).unwrap();
        let outcomes: Outcomes = (
            Err(ForensicsError::Processing("transient worker fault".into())),
            Ok(CompressionReport { score: 0.3, ..Default::default() }),
            Ok(FontReport { score: 0.9, ..Default::default() }),
        );

        let result = engine.recover(&prepared, outcomes, Instant::now() + Duration::from_secs(30));

        assert_eq!(result.analysis_status, AnalysisStatus::CriticalFailure);
        assert_eq!(result.overall_score, 1.0);
        assert_eq!(result.detected_anomalies, vec![CRITICAL_ANOMALY.to_string()]);
        pool.shutdown(true);
    }

    #[test]
    fn test_recover_falls_back_after_repeat_recoverable_failure() {
        let pool = WorkerPool::spawn(2).unwrap();
        let engine = ForensicsEngine::new(pool.clone(), EngineConfig::default());
        // Too small for compression analysis: the re-run fails the same
        // recoverable way as the first pass.
        let prepared = ImageBuffer::from_gray(8, 8, vec![128; 64]).unwrap();
        let outcomes: Outcomes = (
            Ok(EdgeReport { score: 0.2, ..Default::default() }),
            Err(ForensicsError::CompressionAnalysis("degenerate plane".into())),
            Ok(FontReport { score: 0.4, ..Default::default() }),
        );

        let result = engine.recover(&prepared, outcomes, Instant::now() + Duration::from_secs(30));

        assert_eq!(result.analysis_status, AnalysisStatus::PartialFailure);
        assert_eq!(result.compression_score, PARTIAL_FALLBACK_SCORE);
        assert_eq!(
            result.compression_artifacts.extra.get("fallback"),
            Some(&serde_json::Value::Bool(true))
        );
        assert_eq!(result.overall_score, PARTIAL_OVERALL_FLOOR);
        pool.shutdown(true);
    }

    #[test]
    fn test_analyze_on_shut_down_pool_is_critical() {
        let pool = WorkerPool::spawn(1).unwrap();
        pool.shutdown(true);
        let engine = ForensicsEngine::new(pool, EngineConfig::default());
        let img = ImageBuffer::from_gray(32, 32, vec![128; 1024]).unwrap();
        let result = engine.analyze(img).unwrap();
        assert_eq!(result.analysis_status, AnalysisStatus::CriticalFailure);
        assert_eq!(result.overall_score, 1.0);
    }
}
