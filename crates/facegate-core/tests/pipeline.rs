mod common;

use common::*;
use facegate_core::model::TrainedModel;
use facegate_core::quality::QualityDefect;
use facegate_core::{
    CommitGate, FaceError, Pipeline, PipelineSettings, ReferenceSourceKind, SampleImage,
    Threshold, EMBEDDING_DIM,
};
use image::ImageFormat;
use std::path::Path;
use std::sync::Arc;

fn settings(root: &Path, reference_source: ReferenceSourceKind) -> PipelineSettings {
    PipelineSettings {
        enroll_dir: root.join("data/raw/user"),
        reference_dir: root.join("myface"),
        models_dir: root.join("models"),
        reference_source,
        ..PipelineSettings::default()
    }
}

fn pipeline(root: &Path, kind: ReferenceSourceKind) -> (Pipeline, Arc<ScriptedExtractor>) {
    let extractor = Arc::new(ScriptedExtractor::default());
    (Pipeline::new(settings(root, kind), extractor.clone()), extractor)
}

fn threshold(value: f32) -> Threshold {
    Threshold::new(value).unwrap()
}

#[test]
fn test_enroll_accepts_good_sample() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);

    let image = good(1, 0);
    let first = pipeline.enroll(&sample(image.clone())).unwrap();
    assert_eq!(first.total_samples, 1);
    assert!(first.quality.warnings.is_empty());

    let stored = std::fs::read(pipeline.store().dir().join(&first.saved_id)).unwrap();
    assert_eq!(stored, image);

    let second = pipeline.enroll(&sample(good(1, 1))).unwrap();
    assert_eq!(second.total_samples, 2);
    assert_ne!(first.saved_id, second.saved_id);
}

#[test]
fn test_enroll_rejects_formats_other_than_jpeg_and_png() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, extractor) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);

    let bmp = reencode(&good(1, 0), ImageFormat::Bmp);
    match SampleImage::decode(bmp) {
        Err(FaceError::UnsupportedImageFormat { format }) => assert_eq!(format, "Bmp"),
        other => panic!("expected unsupported format, got {other:?}"),
    }
    assert_eq!(extractor.detect_calls(), 0);
    assert_eq!(file_count(pipeline.store().dir()), 0);
    assert_eq!(pipeline.store().count().unwrap(), 0);
}

#[test]
fn test_cancelled_gate_writes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::TrainedModel);
    let gate = CommitGate::new();
    assert!(gate.cancel());

    let err = pipeline.enroll_gated(&sample(good(1, 0)), &gate).unwrap_err();
    assert!(matches!(err, FaceError::Cancelled));
    assert_eq!(file_count(pipeline.store().dir()), 0);

    pipeline.enroll(&sample(good(1, 0))).unwrap();
    let err = pipeline.train_gated(&gate).unwrap_err();
    assert!(matches!(err, FaceError::Cancelled));
    assert!(!pipeline.models().exists());
    assert_eq!(file_count(pipeline.models().dir()), 0);
}

#[test]
fn test_enroll_face_count_policy() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);

    assert!(matches!(
        pipeline.enroll(&sample(good(0, 0))),
        Err(FaceError::NoFaceDetected)
    ));
    assert!(matches!(
        pipeline.enroll(&sample(good(2, 0))),
        Err(FaceError::MultipleFacesDetected { count: 2 })
    ));
    assert!(matches!(
        pipeline.enroll(&sample(good(5, 0))),
        Err(FaceError::MultipleFacesDetected { count: 5 })
    ));
    assert!(matches!(
        pipeline.enroll(&sample(textured(128, [1, 0, NO_VECTOR]))),
        Err(FaceError::EmbeddingExtractionFailed)
    ));
    assert_eq!(file_count(pipeline.store().dir()), 0);
}

#[test]
fn test_dark_gray_sample_is_rejected_without_write() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);

    match pipeline.enroll(&sample(flat(30, [1, 0, NORMAL]))) {
        Err(FaceError::QualityRejected { reasons, report }) => {
            assert!(report.is_too_dark);
            assert!((report.brightness - 30.0).abs() < 0.5);
            assert!(!report.is_face_too_small);
            assert!(reasons.contains(&QualityDefect::TooDark.message().to_string()));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(file_count(pipeline.store().dir()), 0);
}

#[test]
fn test_small_face_and_blur_reject_but_brightness_only_warns() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);

    let small = pipeline.enroll(&sample(textured(128, [1, 0, TINY_FACE])));
    assert!(matches!(
        small,
        Err(FaceError::QualityRejected { ref report, .. }) if report.is_face_too_small
    ));

    let blurry = pipeline.enroll(&sample(flat(128, [1, 0, NORMAL])));
    assert!(matches!(
        blurry,
        Err(FaceError::QualityRejected { ref report, .. }) if report.is_too_blurry
    ));
    assert_eq!(file_count(pipeline.store().dir()), 0);

    let bright = pipeline.enroll(&sample(textured(205, [1, 0, NORMAL]))).unwrap();
    assert!(bright.quality.is_too_bright);
    assert_eq!(bright.quality.warnings.len(), 1);
    assert_eq!(bright.total_samples, 1);
}

#[test]
fn test_train_without_enrollment_data() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);
    assert!(matches!(pipeline.train(), Err(FaceError::NoEnrollmentData { .. })));

    write(&pipeline.settings().enroll_dir, "readme.txt", b"not a sample");
    assert!(matches!(pipeline.train(), Err(FaceError::NoEnrollmentData { .. })));
}

#[test]
fn test_train_with_no_usable_faces() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);
    let dir = pipeline.settings().enroll_dir.clone();
    write(&dir, "none.png", &good(0, 0));
    write(&dir, "two.png", &good(2, 0));
    write(&dir, "broken.jpg", b"garbage");

    match pipeline.train() {
        Err(FaceError::NoUsableEmbeddings { scanned, .. }) => assert_eq!(scanned, 3),
        other => panic!("expected NoUsableEmbeddings, got {other:?}"),
    }
    assert!(!TrainedModel::exists(&pipeline.settings().models_dir));
}

#[test]
fn test_train_skips_bad_files_and_persists_mean() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);
    let dir = pipeline.settings().enroll_dir.clone();
    write(&dir, "a.png", &good(1, 0));
    write(&dir, "b.png", &good(1, 1));
    write(&dir, "c.png", &good(1, ZERO_SEED));
    write(&dir, "d.png", &good(3, 4));
    write(&dir, "e.jpg", b"not an image");
    write(&dir, "f.png", &textured(128, [1, 9, NO_VECTOR]));

    let summary = pipeline.train().unwrap();
    assert_eq!(summary.images_scanned, 6);
    assert_eq!(summary.embeddings_used, 3);
    assert!(summary.embeddings_used <= summary.images_scanned);

    let model = TrainedModel::load(&pipeline.settings().models_dir).unwrap();
    assert_eq!(model.manifest().sources, vec!["a.png", "b.png", "c.png"]);

    let mean = model.mean_embedding().unwrap();
    assert!((mean.as_slice()[0] - 1.0 / 3.0).abs() < 1e-6);
    assert!((mean.as_slice()[1] - 1.0 / 3.0).abs() < 1e-6);
    assert!(mean.as_slice()[2..].iter().all(|&v| v == 0.0));

    let rows = model.embeddings().unwrap();
    for dim in 0..EMBEDDING_DIM {
        let avg = rows.iter().map(|e| e.as_slice()[dim]).sum::<f32>() / rows.len() as f32;
        assert!((avg - mean.as_slice()[dim]).abs() < 1e-6);
    }
}

#[test]
fn test_verify_against_static_references() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);
    let refs = pipeline.settings().reference_dir.clone();
    write(&refs, "me1.png", &good(1, 0));
    write(&refs, "me2.png", &good(1, 1));
    write(&refs, "group.png", &good(2, 7));

    let same = pipeline.verify(&sample(good(1, 1)), threshold(0.5)).unwrap();
    assert!(same.is_match);
    assert_eq!(same.distance, 0.0);
    assert_eq!(same.reference_sample_count, 2);
    assert_eq!(same.reference_files_sample, vec!["me1.png", "me2.png"]);
    assert_eq!(same.nearest_reference.as_deref(), Some("me2.png"));
    assert_eq!(same.image_size.width, 64);

    let other = pipeline.verify(&sample(good(1, 40)), threshold(0.5)).unwrap();
    assert!(!other.is_match);
    assert!((other.distance - 2f32.sqrt()).abs() < 1e-6);
    assert!(other.message().contains("does not match"));

    let boundary = pipeline.verify(&sample(good(1, 40)), threshold(1.0)).unwrap();
    assert!(!boundary.is_match);

    let zero_candidate = pipeline.verify(&sample(good(1, ZERO_SEED)), threshold(1.0)).unwrap();
    assert_eq!(zero_candidate.distance, 1.0);
    assert!(zero_candidate.is_match);
}

#[test]
fn test_verify_face_count_policy() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);
    write(&pipeline.settings().reference_dir, "me.png", &good(1, 0));

    assert!(matches!(
        pipeline.verify(&sample(good(0, 0)), threshold(0.5)),
        Err(FaceError::NoFaceDetected)
    ));
    assert!(matches!(
        pipeline.verify(&sample(good(3, 0)), threshold(0.5)),
        Err(FaceError::MultipleFacesDetected { count: 3 })
    ));
}

#[test]
fn test_verify_without_reference_data() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);
    assert!(matches!(
        pipeline.verify(&sample(good(1, 0)), threshold(0.5)),
        Err(FaceError::NoReferenceData { .. })
    ));

    write(&pipeline.settings().reference_dir, "blank.png", &good(0, 0));
    assert!(matches!(
        pipeline.verify(&sample(good(1, 0)), threshold(0.5)),
        Err(FaceError::NoUsableReferenceEmbeddings { scanned: 1, .. })
    ));

    // Failures are not cached: fixing the directory makes verification work.
    write(&pipeline.settings().reference_dir, "me.png", &good(1, 0));
    assert!(pipeline.verify(&sample(good(1, 0)), threshold(0.5)).unwrap().is_match);
}

#[test]
fn test_static_source_ignores_training() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);
    write(&pipeline.settings().reference_dir, "me.png", &good(1, 0));
    let before = pipeline.reference_set().unwrap();

    pipeline.enroll(&sample(good(1, 3))).unwrap();
    pipeline.train().unwrap();

    let after = pipeline.reference_set().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(!pipeline.verify(&sample(good(1, 3)), threshold(0.5)).unwrap().is_match);
}

#[test]
fn test_trained_model_source_follows_training() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::TrainedModel);

    assert!(matches!(
        pipeline.verify(&sample(good(1, 3)), threshold(0.5)),
        Err(FaceError::NoReferenceData { .. })
    ));

    pipeline.enroll(&sample(good(1, 3))).unwrap();
    pipeline.train().unwrap();
    let first = pipeline.verify(&sample(good(1, 3)), threshold(0.5)).unwrap();
    assert!(first.is_match);
    assert_eq!(first.reference_sample_count, 1);

    pipeline.enroll(&sample(good(1, 4))).unwrap();
    pipeline.train().unwrap();
    let second = pipeline.verify(&sample(good(1, 4)), threshold(0.5)).unwrap();
    assert!(second.is_match);
    assert_eq!(second.reference_sample_count, 2);
}

#[test]
fn test_verify_against_mean() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);
    assert!(matches!(
        pipeline.verify_against_mean(&sample(good(1, 0)), threshold(0.5)),
        Err(FaceError::NoReferenceData { .. })
    ));

    pipeline.enroll(&sample(good(1, 0))).unwrap();
    pipeline.enroll(&sample(good(1, 1))).unwrap();
    pipeline.train().unwrap();

    // Mean is 0.5 on dims 0 and 1; the candidate unit(0) sits sqrt(0.5) away.
    let near = pipeline.verify_against_mean(&sample(good(1, 0)), threshold(0.75)).unwrap();
    assert!(near.is_match);
    assert!((near.distance - 0.5f32.sqrt()).abs() < 1e-6);

    let strict = pipeline.verify_against_mean(&sample(good(1, 0)), threshold(0.5)).unwrap();
    assert!(!strict.is_match);
}

#[test]
fn test_concurrent_verifications_load_references_once() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, extractor) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);
    write(&pipeline.settings().reference_dir, "a.png", &good(1, 0));
    write(&pipeline.settings().reference_dir, "b.png", &good(1, 1));

    let candidate = sample(good(1, 0));
    let outcomes: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..12)
            .map(|_| s.spawn(|| pipeline.verify(&candidate, threshold(0.5)).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(outcomes.iter().all(|o| o.is_match && o.reference_sample_count == 2));
    // Two reference images scanned once, plus one detection per candidate.
    assert_eq!(extractor.detect_calls(), 2 + 12);
}

#[test]
fn test_analyze_reports_without_writing() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::StaticDirectory);

    let analysis = pipeline.analyze(&sample(flat(30, [1, 0, NORMAL]))).unwrap();
    assert!(analysis.quality.is_too_dark);
    assert!(analysis.quality.is_too_blurry);
    assert_eq!(analysis.quality.warnings.len(), 2);
    assert_eq!(analysis.image_size.height, 64);
    assert_eq!(file_count(pipeline.store().dir()), 0);
}

#[test]
fn test_concurrent_training_keeps_model_files_consistent() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline(root.path(), ReferenceSourceKind::TrainedModel);
    pipeline.enroll(&sample(good(1, 0))).unwrap();

    std::thread::scope(|s| {
        s.spawn(|| {
            for seed in 1..6 {
                pipeline.enroll(&sample(good(1, seed))).unwrap();
            }
        });
        for _ in 0..3 {
            s.spawn(|| {
                for _ in 0..4 {
                    pipeline.train().unwrap();
                }
            });
        }
        for _ in 0..2 {
            s.spawn(|| {
                for _ in 0..20 {
                    let Some(model) = pipeline.models().load().unwrap() else {
                        continue;
                    };
                    let rows = model.embeddings().unwrap();
                    assert_eq!(rows.len(), model.manifest().sources.len());
                    let mean = model.mean_embedding().unwrap();
                    for dim in 0..EMBEDDING_DIM {
                        let avg = rows.iter().map(|e| e.as_slice()[dim]).sum::<f32>()
                            / rows.len() as f32;
                        assert!((avg - mean.as_slice()[dim]).abs() < 1e-6);
                    }
                }
            });
        }
    });

    pipeline.train().unwrap();
    let model = pipeline.models().load().unwrap().unwrap();
    assert_eq!(model.len(), 6);
    let outcome = pipeline.verify(&sample(good(1, 5)), threshold(0.5)).unwrap();
    assert!(outcome.is_match);
    assert_eq!(outcome.reference_sample_count, 6);
}
