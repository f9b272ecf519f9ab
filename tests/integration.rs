use std::{path::PathBuf, time::Instant};

use textsieve::{
    ocr::OnnxOcrBuilder, triage::load_image, ImageFrame, OcrProvider, TextClassifier, Thresholds,
    Verdict,
};

// Needs the PP-OCR models and a captioned screenshot under tests/data, which are
// too large to keep in the repository.
#[test]
#[ignore = "requires ONNX models under tests/data/models"]
fn onnx_engine_flags_captioned_image() {
    let _ = env_logger::builder().is_test(true).try_init();

    let image = load_image("tests/data/test_image.png".as_ref()).expect("Failed to load test image");
    let cache = PathBuf::from(std::env!("CARGO_TARGET_TMPDIR")).join(".engine_cache");
    std::fs::create_dir_all(&cache).expect("Failed to create temp dir");
    let ocr = OnnxOcrBuilder::new()
        .det_model("tests/data/models/det.onnx")
        .rec_model(
            "tests/data/models/rec.onnx",
            "tests/data/models/ppocr_keys_v1.txt",
        )
        .with_engine_cache_path(cache)
        .max_side_len(2048)
        .accelerated(false)
        .build()
        .expect("Failed to build engine");

    let start = Instant::now();
    let detections = ocr.detect(&image).expect("Failed recognition.");
    log::debug!("{:?}", start.elapsed());
    log::debug!("{detections:#?}");
    assert!(detections.len() > 1);
    assert!(detections.iter().all(|it| it.region.0.len() == 4));

    let frame = ImageFrame::new(image.width(), image.height()).unwrap();
    let classifier = TextClassifier::new(Thresholds::default()).unwrap();
    assert_eq!(classifier.classify(&detections, frame), Verdict::Meme);
}
