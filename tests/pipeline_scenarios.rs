use image::{Rgb, RgbImage};
use std::path::Path;

use pose_relay::config::{ClipFormat, ClipSettings, PathSettings};
use pose_relay::delivery::image_caption;
use pose_relay::media::{self, FrameWriter, MediaKind};
use pose_relay::pipeline::{PipelineError, PipelineOutput, ProcessOptions, RequestPipeline};
use pose_relay::pose::{PoseDetector, Posture, SimulatedBackend, Topology};
use pose_relay::ClipRenderer;

fn test_pipeline(dir: &Path) -> RequestPipeline {
    let paths = PathSettings::under(dir);
    paths.ensure_dirs().unwrap();
    let detector = PoseDetector::new(Box::new(SimulatedBackend::new(Topology::Coco17)), 0.3);
    let clip = ClipSettings {
        fps: 5,
        duration_secs: 1.0,
        format: ClipFormat::Gif,
    };
    let renderer = ClipRenderer::new(&clip, paths.videos_dir());
    RequestPipeline::new(detector, renderer, &paths)
}

fn pipeline_error(err: &anyhow::Error) -> &PipelineError {
    err.downcast_ref::<PipelineError>()
        .expect("pipeline error inside anyhow")
}

#[test]
fn photo_yields_one_bent_person_and_annotated_still() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = test_pipeline(dir.path());
    let input = dir.path().join("person.png");
    media::save_image(&input, &RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]))).unwrap();

    let output = pipeline.process(&input, ProcessOptions::default()).unwrap();
    assert_eq!(output.kind(), MediaKind::Image);
    let tally = output.tally();
    assert_eq!((tally.images, tally.videos, tally.persons), (1, 0, 1));

    let PipelineOutput::Image(outcome) = output else {
        panic!("expected an image outcome");
    };
    assert_eq!(outcome.original, input);
    assert!(outcome.annotated.starts_with(dir.path().join("poses")));
    let name = outcome.annotated.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("pose_") && name.ends_with(".jpg"), "{name}");
    assert_eq!(outcome.postures, vec![Posture::BentSitting]);
    assert_eq!(outcome.stats.num_persons, 1);
    assert!(outcome.clip.is_none());

    let annotated = media::load_image(&outcome.annotated).unwrap();
    assert_eq!(annotated.dimensions(), (640, 480));

    let caption = image_caption(&outcome);
    assert!(caption.contains("Persons detected: 1"));
    assert!(caption.contains("Person 1: bent/sitting"));
}

#[test]
fn photo_with_clip_renders_zoom_clip() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = test_pipeline(dir.path());
    let input = dir.path().join("small.jpg");
    media::save_image(&input, &RgbImage::from_pixel(80, 60, Rgb([10, 120, 10]))).unwrap();

    let output = pipeline
        .process(&input, ProcessOptions { render_clip: true })
        .unwrap();
    let PipelineOutput::Image(outcome) = output else {
        panic!("expected an image outcome");
    };
    let clip = outcome.clip.expect("clip rendered");
    assert!(clip.starts_with(dir.path().join("videos")));
    let info = media::probe(&clip).unwrap();
    assert_eq!(info.frame_count, 5);
    assert_eq!((info.width, info.height), (80, 60));
}

#[test]
fn gif_is_processed_as_video() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = test_pipeline(dir.path());
    let input = dir.path().join("moving.gif");
    let mut writer = FrameWriter::create(&input, 32, 24, 10.0).unwrap();
    for shade in [0u8, 60, 120] {
        writer
            .write(&RgbImage::from_pixel(32, 24, Rgb([shade, shade, shade])))
            .unwrap();
    }
    writer.finish().unwrap();

    let output = pipeline.process(&input, ProcessOptions::default()).unwrap();
    assert_eq!(output.tally().videos, 1);
    let PipelineOutput::Video(outcome) = output else {
        panic!("expected a video outcome");
    };
    assert_eq!(outcome.original, input);
    assert_eq!(outcome.persons, 1);
    assert_eq!(outcome.info.frame_count, 3);
    assert_eq!((outcome.info.width, outcome.info.height), (32, 24));
    assert!(outcome.annotated.starts_with(dir.path().join("videos")));
}

#[test]
fn rejects_missing_unsupported_and_unreadable_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = test_pipeline(dir.path());

    let err = pipeline
        .process(&dir.path().join("absent.jpg"), ProcessOptions::default())
        .unwrap_err();
    assert!(matches!(pipeline_error(&err), PipelineError::NotFound(_)));

    let bmp = dir.path().join("scan.bmp");
    std::fs::write(&bmp, b"BM").unwrap();
    let err = pipeline.process(&bmp, ProcessOptions::default()).unwrap_err();
    assert!(matches!(pipeline_error(&err), PipelineError::Unsupported(_)));

    let broken = dir.path().join("broken.jpg");
    std::fs::write(&broken, b"not really a jpeg").unwrap();
    let err = pipeline.process(&broken, ProcessOptions::default()).unwrap_err();
    assert!(matches!(pipeline_error(&err), PipelineError::Unreadable { .. }));
}

#[test]
fn high_threshold_hides_joints_but_counts_people() {
    let dir = tempfile::tempdir().unwrap();
    let paths = PathSettings::under(dir.path());
    paths.ensure_dirs().unwrap();
    // Every score falls below a threshold above the simulated 0.9.
    let detector = PoseDetector::new(Box::new(SimulatedBackend::new(Topology::Coco17)), 0.95);
    let renderer = ClipRenderer::new(&ClipSettings::default(), paths.videos_dir());
    let mut pipeline = RequestPipeline::new(detector, renderer, &paths);
    let input = dir.path().join("person.png");
    media::save_image(&input, &RgbImage::new(640, 480)).unwrap();

    let PipelineOutput::Image(outcome) = pipeline.process(&input, ProcessOptions::default()).unwrap()
    else {
        panic!("expected an image outcome");
    };
    // Persons are counted regardless of the drawing threshold.
    assert_eq!(outcome.stats.num_persons, 1);
    assert!(outcome.annotated.exists());
}
