mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use storyreel::caption::{CaptionEngine, CaptionSettings};
use storyreel::compose::ComposedVideo;
use storyreel::error::{CaptionError, CaptionServiceError};
use storyreel::media::MediaInfo;

use support::{FakeCaptioner, FakeMedia, quick_captions, read_media, write_media};

fn composed_in(dir: &std::path::Path, seconds: f64) -> ComposedVideo {
    composed_at(dir, seconds, 30.0)
}

fn composed_at(dir: &std::path::Path, seconds: f64, fps: f64) -> ComposedVideo {
    let path = dir.join("composed.mp4");
    write_media(
        &path,
        MediaInfo {
            duration: seconds,
            fps,
            width: 606,
            height: 1080,
        },
    );
    ComposedVideo { path, duration: seconds, fps }
}

fn engine(captioner: Arc<FakeCaptioner>, media: Arc<FakeMedia>, settings: CaptionSettings) -> CaptionEngine {
    CaptionEngine::new(captioner, media, settings)
}

#[tokio::test]
async fn short_video_is_captioned_whole() {
    let dir = tempfile::tempdir().unwrap();
    let composed = composed_in(dir.path(), 90.0);
    let media = Arc::new(FakeMedia::default());
    let captioner = Arc::new(FakeCaptioner::default());

    let outcome = engine(captioner.clone(), media.clone(), quick_captions())
        .caption(&composed, dir.path())
        .await
        .unwrap();

    assert_eq!(outcome.segments, 1);
    assert_eq!(captioner.submission_count(), 1);
    assert!(media.cuts.lock().unwrap().is_empty());
    assert!(media.concats.lock().unwrap().is_empty());
    assert_eq!(read_media(&outcome.path).unwrap().duration, 90.0);
    assert!(!dir.path().join("segments").exists());
}

#[tokio::test]
async fn thirteen_minutes_reassembles_in_index_order() {
    let dir = tempfile::tempdir().unwrap();
    let composed = composed_in(dir.path(), 780.0);
    let media = Arc::new(FakeMedia::default());
    let captioner = Arc::new(FakeCaptioner {
        reverse_finish: true,
        ..FakeCaptioner::default()
    });

    let outcome = engine(captioner.clone(), media.clone(), quick_captions())
        .caption(&composed, dir.path())
        .await
        .unwrap();

    assert_eq!(outcome.segments, 5);
    let spans: Vec<f64> = media
        .cuts
        .lock()
        .unwrap()
        .iter()
        .map(|(_, span)| span.duration)
        .collect();
    assert_eq!(spans, vec![180.0, 180.0, 180.0, 180.0, 60.0]);

    let concats = media.concats.lock().unwrap();
    assert_eq!(concats.len(), 1);
    let names: Vec<String> = concats[0]
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "captioned_000.mp4",
            "captioned_001.mp4",
            "captioned_002.mp4",
            "captioned_003.mp4",
            "captioned_004.mp4"
        ]
    );
    assert_eq!(read_media(&outcome.path).unwrap().duration, 780.0);
    assert!(!dir.path().join("segments").exists());
}

#[tokio::test]
async fn never_exceeds_the_in_flight_bound() {
    let dir = tempfile::tempdir().unwrap();
    let composed = composed_in(dir.path(), 1500.0);
    let media = Arc::new(FakeMedia::default());
    let captioner = Arc::new(FakeCaptioner {
        polls_needed: 5,
        ..FakeCaptioner::default()
    });
    let settings = CaptionSettings {
        max_in_flight: 2,
        ..quick_captions()
    };

    let outcome = engine(captioner.clone(), media, settings)
        .caption(&composed, dir.path())
        .await
        .unwrap();

    assert_eq!(outcome.segments, 9);
    assert_eq!(captioner.submission_count(), 9);
    assert!(captioner.peak_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn failed_segment_is_reported_by_index() {
    let dir = tempfile::tempdir().unwrap();
    let composed = composed_in(dir.path(), 780.0);
    let media = Arc::new(FakeMedia::default());
    let captioner = Arc::new(FakeCaptioner {
        fail_segment: Some(2),
        ..FakeCaptioner::default()
    });

    let err = engine(captioner, media.clone(), quick_captions())
        .caption(&composed, dir.path())
        .await
        .unwrap_err();

    assert_eq!(err.segment_index(), Some(2));
    assert!(matches!(
        err,
        CaptionError::Segment {
            source: CaptionServiceError::JobFailed(_),
            ..
        }
    ));
    assert!(media.concats.lock().unwrap().is_empty());
    assert!(!dir.path().join("segments").exists());
    assert!(!dir.path().join("captioned.mp4").exists());
}

#[tokio::test]
async fn timed_out_segment_is_submitted_again() {
    let dir = tempfile::tempdir().unwrap();
    let composed = composed_in(dir.path(), 60.0);
    let media = Arc::new(FakeMedia::default());
    let captioner = Arc::new(FakeCaptioner {
        hang_submissions: 1,
        ..FakeCaptioner::default()
    });
    let settings = CaptionSettings {
        timeout_floor: Duration::from_millis(50),
        timeout_resubmissions: 1,
        ..quick_captions()
    };

    let outcome = engine(captioner.clone(), media, settings)
        .caption(&composed, dir.path())
        .await
        .unwrap();

    assert_eq!(outcome.segments, 1);
    assert_eq!(captioner.submission_count(), 2);
}

#[tokio::test]
async fn gives_up_after_resubmissions_run_out() {
    let dir = tempfile::tempdir().unwrap();
    let composed = composed_in(dir.path(), 60.0);
    let media = Arc::new(FakeMedia::default());
    let captioner = Arc::new(FakeCaptioner {
        hang_submissions: usize::MAX,
        ..FakeCaptioner::default()
    });
    let settings = CaptionSettings {
        timeout_floor: Duration::from_millis(20),
        timeout_resubmissions: 2,
        ..quick_captions()
    };

    let err = engine(captioner.clone(), media, settings)
        .caption(&composed, dir.path())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CaptionError::Segment {
            index: 0,
            source: CaptionServiceError::TimedOut(_)
        }
    ));
    assert_eq!(captioner.submission_count(), 3);
}

#[tokio::test]
async fn drift_is_checked_on_millisecond_grid_without_frame_rate() {
    let dir = tempfile::tempdir().unwrap();
    let composed = composed_at(dir.path(), 780.0, 0.0);
    let media = Arc::new(FakeMedia {
        concat_drift: 0.5,
        ..FakeMedia::default()
    });

    let err = engine(Arc::new(FakeCaptioner::default()), media, quick_captions())
        .caption(&composed, dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, CaptionError::Drift { .. }));
}

#[tokio::test]
async fn one_frame_of_drift_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let composed = composed_at(dir.path(), 780.0, 30.0);
    let media = Arc::new(FakeMedia {
        concat_drift: 1.0 / 30.0,
        ..FakeMedia::default()
    });

    let outcome = engine(Arc::new(FakeCaptioner::default()), media, quick_captions())
        .caption(&composed, dir.path())
        .await
        .unwrap();

    assert_eq!(outcome.segments, 5);
}

#[tokio::test]
async fn disabled_engine_passes_video_through() {
    let dir = tempfile::tempdir().unwrap();
    let composed = composed_in(dir.path(), 780.0);
    let media = Arc::new(FakeMedia::default());

    let engine = CaptionEngine::disabled(media.clone());
    assert!(!engine.is_enabled());
    let outcome = engine.caption(&composed, dir.path()).await.unwrap();

    assert_eq!(outcome.path, composed.path);
    assert_eq!(outcome.segments, 0);
    assert!(media.cuts.lock().unwrap().is_empty());
}
