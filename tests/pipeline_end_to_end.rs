use std::sync::Arc;
use std::time::Duration;

use hazard_watch::detect::StubProvider;
use hazard_watch::ingest::{SyntheticConfig, SyntheticSource};
use hazard_watch::pipeline::{to_pixel_rect, OverlaySummary};
use hazard_watch::{
    BackendStatus, BoundingBox, DetectionPipeline, ObjectDetectionConfig, Priority,
    ProviderRegistry,
};

fn registry_with(provider: Arc<StubProvider>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register_shared(provider);
    Arc::new(registry)
}

fn config(models: &[&str], max_retries: u32) -> ObjectDetectionConfig {
    let mut cfg = ObjectDetectionConfig::with_models(models.iter().copied());
    cfg.enabled = true;
    cfg.interval_ms = 1000;
    cfg.max_retries = max_retries;
    cfg
}

fn camera(warmup_polls: u32) -> Arc<SyntheticSource> {
    Arc::new(
        SyntheticSource::new(SyntheticConfig {
            url: "stub://yard".to_string(),
            width: 64,
            height: 48,
            warmup_polls,
        })
        .expect("synthetic source"),
    )
}

#[tokio::test(start_paused = true)]
async fn first_model_fails_second_loads() {
    let provider = Arc::new(StubProvider::new().with_failing("a"));
    let pipeline =
        DetectionPipeline::new(config(&["stub:a", "stub:b"], 2), registry_with(provider.clone()))
            .expect("pipeline");

    assert!(pipeline.load().await);
    let state = pipeline.backend_state();
    assert!(state.loaded);
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert_eq!(state.active_model_index, 1);
    assert_eq!(pipeline.config().model, "stub:b");
    assert_eq!(provider.attempts(), vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn every_model_failing_ends_in_error_until_retry() {
    let provider = Arc::new(StubProvider::new().with_failing("a").with_failing("b"));
    let pipeline =
        DetectionPipeline::new(config(&["stub:a", "stub:b"], 2), registry_with(provider.clone()))
            .expect("pipeline");
    let mut states = pipeline.subscribe_backend_state();

    assert!(!pipeline.load().await);
    assert_eq!(provider.attempts().len(), 4);
    let state = states.borrow_and_update().clone();
    assert_eq!(state.status(), BackendStatus::Error);
    assert!(!state.loaded && !state.loading);
    assert!(state.error.unwrap().contains("all models failed"));

    // running the scheduler does not restart loading from the error state
    pipeline.start_detection(camera(0));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(provider.attempts().len(), 4);

    provider.set_failing("b", false);
    assert!(pipeline.retry_load().await);
    let state = pipeline.backend_state();
    assert_eq!(state.status(), BackendStatus::Ready);
    assert_eq!(state.active_model_index, 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(pipeline.counters().cycles_published >= 1);
}

#[tokio::test(start_paused = true)]
async fn published_batches_are_filtered_and_ranked() {
    let provider = Arc::new(StubProvider::new().with_infer_latency(Duration::from_millis(100)));
    let pipeline = DetectionPipeline::new(config(&["stub:detr"], 1), registry_with(provider))
        .expect("pipeline");
    assert!(pipeline.load().await);

    let source = camera(2);
    let mut batches = pipeline.subscribe_detections();
    assert!(pipeline.start_detection(source.clone()));
    assert!(!pipeline.start_detection(source.clone()));

    let mut seen = 0;
    let mut high = 0u64;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(40);
    while tokio::time::Instant::now() < deadline {
        if tokio::time::timeout(Duration::from_secs(5), batches.changed())
            .await
            .is_err()
        {
            continue;
        }
        let batch = batches.borrow_and_update().clone();
        for pair in batch.windows(2) {
            assert!(
                pair[0].priority > pair[1].priority
                    || (pair[0].priority == pair[1].priority && pair[0].score >= pair[1].score),
                "batch not ranked: {:?}",
                batch
            );
        }
        for det in &batch {
            assert!(det.score >= 0.4);
            if det.priority == Priority::High {
                assert!(det.score >= 0.7);
            }
        }
        high += OverlaySummary::from_batch(&batch).safety_alerts as u64;
        seen += batch.len() as u64;
    }

    pipeline.stop_detection();
    let stats = pipeline.stats();
    assert!(stats.total_detections > 0);
    assert_eq!(stats.total_detections, seen);
    assert_eq!(stats.high_priority_count, high);
    assert!(stats.average_confidence >= 0.4 && stats.average_confidence <= 1.0);
    assert!(stats.detection_rate > 0.0);
    assert!(pipeline.detections().is_empty());

    // the first two readiness polls were answered with metadata only
    let captured = source.stats().frames_captured;
    assert_eq!(captured, pipeline.counters().cycles_published);
}

#[tokio::test(start_paused = true)]
async fn slow_inference_skips_ticks() {
    let provider = Arc::new(StubProvider::new().with_infer_latency(Duration::from_millis(2500)));
    let pipeline = DetectionPipeline::new(config(&["stub:slow"], 1), registry_with(provider))
        .expect("pipeline");
    assert!(pipeline.load().await);

    let source = camera(0);
    pipeline.start_detection(source.clone());
    tokio::time::sleep(Duration::from_secs(12)).await;
    pipeline.stop_detection();

    let counters = pipeline.counters();
    assert!(counters.ticks_skipped >= 4, "{:?}", counters);
    // one frame per started cycle, never more than one cycle per 3 ticks
    assert!(source.stats().frames_captured <= 4);
}

#[test]
fn overlay_maps_normalized_boxes_to_video_pixels() {
    let rect = to_pixel_rect(&BoundingBox::new(100.0, 200.0, 300.0, 400.0), 640.0, 480.0);
    let close = |a: f32, b: f32| (a - b).abs() < 1e-3;
    assert!(close(rect.left, 64.0));
    assert!(close(rect.top, 96.0));
    assert!(close(rect.width, 128.0));
    assert!(close(rect.height, 96.0));
}
