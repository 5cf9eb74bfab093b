//! End-to-end engine tests against the public API only.

use std::time::Duration;
use tamperscope::{
    AnalysisStatus, EngineConfig, ForensicsEngine, ForensicsError, ImageBuffer, WorkerPool,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

fn engine() -> (ForensicsEngine, tamperscope::WorkerPoolHandle) {
    init_tracing();
    let pool = WorkerPool::spawn(3).expect("pool spawn");
    (ForensicsEngine::new(pool.clone(), EngineConfig::default()), pool)
}

fn solid(w: usize, h: usize, value: u8) -> ImageBuffer {
    ImageBuffer::from_gray(w, h, vec![value; w * h]).expect("valid buffer")
}

fn noise(w: usize, h: usize, seed: u64) -> ImageBuffer {
    let mut state = seed.max(1);
    let data: Vec<u8> = (0..w * h)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 256) as u8
        })
        .collect();
    ImageBuffer::from_gray(w, h, data).expect("valid buffer")
}

#[test]
fn solid_image_succeeds_with_clean_font_score() {
    let (engine, pool) = engine();
    let result = engine.analyze(solid(512, 512, 200)).expect("analysis");

    assert_eq!(result.analysis_status, AnalysisStatus::Success);
    assert_eq!(result.font_score, 1.0, "blank page has nothing inconsistent");
    assert!(result.error_details.is_none());
    assert_eq!(result.edge_inconsistencies.copy_move_score, 0.0);
    assert_eq!(result.edge_inconsistencies.noise_inconsistency, 0.0);
    for score in [
        result.edge_score,
        result.compression_score,
        result.font_score,
        result.overall_score,
    ] {
        assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
    }
    pool.shutdown(true);
}

#[test]
fn scores_bounded_on_noise_image() {
    let (engine, pool) = engine();
    let result = engine.analyze(noise(256, 256, 42)).expect("analysis");

    assert_eq!(result.analysis_status, AnalysisStatus::Success);
    for score in [
        result.edge_score,
        result.compression_score,
        result.font_score,
        result.overall_score,
    ] {
        assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
    }
    let expected = 0.4 * result.edge_score
        + 0.3 * result.compression_score
        + 0.3 * result.font_score;
    assert!((result.overall_score - expected).abs() < 1e-12);
    assert!(result.ela_analysis.is_some());
    assert!(result.copy_move_regions.is_some());
    assert!(result.noise_analysis.is_some());
    pool.shutdown(true);
}

#[test]
fn repeated_analysis_is_bit_identical() {
    let (engine, pool) = engine();
    let image = noise(256, 256, 7);
    let a = engine.analyze(image.clone()).expect("first run");
    let b = engine.analyze(image).expect("second run");

    assert_eq!(a.overall_score.to_bits(), b.overall_score.to_bits());
    assert_eq!(a.edge_score.to_bits(), b.edge_score.to_bits());
    assert_eq!(a.compression_score.to_bits(), b.compression_score.to_bits());
    assert_eq!(a.font_score.to_bits(), b.font_score.to_bits());
    assert_eq!(a.detected_anomalies, b.detected_anomalies);
    pool.shutdown(true);
}

#[test]
fn tiny_image_yields_critical_failure_with_maximum_scores() {
    let (engine, pool) = engine();
    let result = engine.analyze(solid(8, 8, 128)).expect("well-formed result");

    assert_eq!(result.analysis_status, AnalysisStatus::CriticalFailure);
    assert_eq!(result.overall_score, 1.0);
    assert_eq!(result.edge_score, 1.0);
    assert_eq!(result.compression_score, 1.0);
    assert_eq!(result.font_score, 1.0);
    assert_eq!(
        result.detected_anomalies,
        vec!["Critical analysis failure - high risk".to_string()]
    );
    assert!(result.error_details.is_some());
    pool.shutdown(true);
}

#[test]
fn invalid_buffer_is_the_only_raw_error() {
    let (engine, pool) = engine();
    let bad = ImageBuffer {
        width: 16,
        height: 16,
        channels: 3,
        data: vec![0u8; 100],
    };
    let err = engine.analyze(bad).expect_err("mis-shaped buffer is a caller bug");
    assert!(matches!(err, ForensicsError::InvalidInput(_)));
    pool.shutdown(true);
}

#[test]
fn pasted_patch_outscores_unmodified_image() {
    let (engine, pool) = engine();
    let clean = noise(384, 384, 99);
    let baseline = engine.analyze(clean.clone()).expect("baseline");

    let mut forged = clean;
    for dy in 0..96 {
        for dx in 0..96 {
            let v = forged.data[(40 + dy) * 384 + (40 + dx)];
            forged.data[(230 + dy) * 384 + (230 + dx)] = v;
        }
    }
    let tampered = engine.analyze(forged).expect("tampered");

    assert!(
        tampered.edge_inconsistencies.copy_move_score
            > baseline.edge_inconsistencies.copy_move_score,
        "clone must raise the copy-move score: {} vs {}",
        tampered.edge_inconsistencies.copy_move_score,
        baseline.edge_inconsistencies.copy_move_score
    );
    pool.shutdown(true);
}

#[test]
fn spliced_compression_history_raises_ela() {
    let (engine, pool) = engine();

    // Uniform history: the whole image went through one q85 cycle.
    let uniform = jpeg_cycle(&noise(192, 192, 5), 85);
    let base = engine.analyze(uniform.clone()).expect("uniform");

    // Mixed history: one block went through a much harsher cycle.
    let crushed = jpeg_cycle(&uniform, 20);
    let mut spliced = uniform;
    for y in 48..144 {
        for x in 48..144 {
            spliced.data[y * 192 + x] = crushed.data[y * 192 + x];
        }
    }
    let mixed = engine.analyze(spliced).expect("spliced");

    let base_ela = base.ela_analysis.expect("ela present");
    let mixed_ela = mixed.ela_analysis.expect("ela present");
    assert!(
        mixed_ela.score > base_ela.score,
        "splice must raise ELA: {} vs {}",
        mixed_ela.score,
        base_ela.score
    );
    assert!(!mixed_ela.regions.is_empty(), "splice should localize to regions");
    pool.shutdown(true);
}

#[test]
fn oversized_image_is_downscaled_and_completes() {
    init_tracing();
    let pool = WorkerPool::spawn(3).expect("pool spawn");
    let config = EngineConfig {
        max_dimension: 256,
        timeout: Duration::from_secs(120),
        ..EngineConfig::default()
    };
    let engine = ForensicsEngine::new(pool.clone(), config);

    let result = engine.analyze(noise(1024, 512, 3)).expect("analysis");
    assert_eq!(result.analysis_status, AnalysisStatus::Success);
    // Copy-move regions live in the downscaled frame.
    if let Some(regions) = &result.copy_move_regions {
        for r in regions {
            assert!(r.x < 256 && r.y < 256, "region outside downscaled frame");
        }
    }
    pool.shutdown(true);
}

#[test]
fn result_serializes_to_json() {
    let (engine, pool) = engine();
    let result = engine.analyze(noise(128, 128, 17)).expect("analysis");
    let json = serde_json::to_string(&result).expect("serialize");
    let back: tamperscope::ForensicsResult = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.analysis_status, result.analysis_status);
    assert_eq!(back.detected_anomalies, result.detected_anomalies);
    pool.shutdown(true);
}

/// Encode at `quality` and decode back, via the same in-memory codec the
/// engine's ELA stage uses.
fn jpeg_cycle(src: &ImageBuffer, quality: u8) -> ImageBuffer {
    let mut encoded = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut encoded, quality);
    let gray = image::GrayImage::from_raw(src.width as u32, src.height as u32, src.data.clone())
        .expect("raw buffer");
    encoder.encode_image(&gray).expect("encode");
    let decoded = image::load_from_memory(&encoded).expect("decode").into_luma8();
    ImageBuffer::from_gray(src.width, src.height, decoded.into_raw()).expect("valid buffer")
}
