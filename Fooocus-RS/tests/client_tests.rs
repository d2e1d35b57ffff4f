
use fooocus_rs::*;
use std::sync::atomic::Ordering;
use test_helpers::{closed_endpoint, serve, FakeBackend};

#[tokio::test]
async fn test_health_against_running_backend() {
    let url = serve(FakeBackend::new()).await;
    let client = FooocusClient::new(url);
    assert!(client.health().await.unwrap());
    assert!(client.is_up().await);
}

#[tokio::test]
async fn test_health_against_closed_port() {
    let client = FooocusClient::new(closed_endpoint().await);
    assert!(!client.is_up().await);
    let err = client.health().await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_submit_posts_async_body() {
    let fake = FakeBackend::new();
    let client = FooocusClient::new(serve(fake.clone()).await);

    let params = TextToImageParams::new("a red fox")
        .negative("blurry")
        .aspect_ratio("896*1152")
        .image_number(2)
        .seed(-1);
    let job = client.submit(&JobPayload::TextToImage(params)).await.unwrap();
    assert_eq!(job.job_id, "job-42");
    assert_eq!(job.stage, JobStage::Pending);

    let submissions = fake.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    let (route, body) = &submissions[0];
    assert_eq!(route, "text-to-image");
    assert_eq!(body["prompt"], "a red fox");
    assert_eq!(body["aspect_ratios_selection"], "896*1152");
    assert_eq!(body["image_number"], 2);
    assert_eq!(body["image_seed"], -1);
    assert_eq!(body["async_process"], true);
    assert_eq!(body["style_selections"][0], "Fooocus V2");
}

#[tokio::test]
async fn test_variation_uses_vary_endpoint() {
    let fake = FakeBackend::new();
    let client = FooocusClient::new(serve(fake.clone()).await);

    let params = VariationParams::new(
        TextToImageParams::new("a red fox"),
        VaryStrength::Subtle,
        "aGVsbG8=".into(),
    );
    client.submit(&JobPayload::Variation(params)).await.unwrap();

    let submissions = fake.submissions.lock().unwrap();
    assert_eq!(submissions[0].0, "vary");
    assert_eq!(submissions[0].1["uov_method"], "Vary (Subtle)");
}

#[tokio::test]
async fn test_submit_rejected_is_http_error() {
    let fake = FakeBackend::new();
    fake.reject_submit.store(true, Ordering::SeqCst);
    let client = FooocusClient::new(serve(fake).await);

    let err = client
        .submit(&JobPayload::TextToImage(TextToImageParams::new("x")))
        .await
        .unwrap_err();
    match err {
        FooocusError::Http { status, body } => {
            assert_eq!(status, 422);
            assert!(body.contains("unknown style"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_submit_to_closed_port_is_unavailable() {
    let client = FooocusClient::new(closed_endpoint().await);
    let err = client
        .submit(&JobPayload::TextToImage(TextToImageParams::new("x")))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_query_job_progress_then_result() {
    let fake = FakeBackend::new();
    let client = FooocusClient::new(serve(fake).await);

    let first = client.query_job("job-42").await;
    assert_eq!(first.stage, JobStage::Running);
    assert!((first.progress - 0.5).abs() < 1e-9);
    assert!(!first.transient);

    let second = client.query_job("job-42").await;
    assert_eq!(second.stage, JobStage::Completed);
    assert_eq!(second.images.len(), 1);
    assert_eq!(second.images[0].seed, Some(777));

    let bytes = client.image_bytes(&second.images[0]).await.unwrap();
    assert_eq!(bytes, b"\x89PNG-fake");
}

#[tokio::test]
async fn test_query_job_network_failure_is_transient_snapshot() {
    let client = FooocusClient::new(closed_endpoint().await);
    let snapshot = client.query_job("job-42").await;
    assert_eq!(snapshot.stage, JobStage::Error);
    assert!(snapshot.transient);
    assert!(snapshot.error.is_some());
    assert_eq!(snapshot.job_id, "job-42");
}
