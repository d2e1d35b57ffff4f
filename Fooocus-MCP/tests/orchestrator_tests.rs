
use base64::Engine;
use fooocus_mcp::*;
use fooocus_rs::{JobPayload, VaryStrength};
use std::time::Duration;
use tempfile::tempdir;
use test_helpers::*;

#[tokio::test(start_paused = true)]
async fn test_red_fox_two_images_with_sidecars() {
    let temp = tempdir().unwrap();
    let fake = FakeBackend::up()
        .with_seeds(&[111, 222])
        .with_script(vec![pending(), running(0.3), running(0.7)]);
    let orch = orchestrator(fake, temp.path(), settings());

    let result = orch
        .generate(
            GenerationRequest::new("a red fox")
                .with_num_images(2.0)
                .with_seed(-1),
        )
        .await
        .unwrap();

    assert_eq!(result.job_id, "job-0001");
    assert_eq!(result.images.len(), 2);
    assert_eq!(result.request.image_number, 2);
    assert_eq!(result.output_dir, temp.path());

    let payload = orch.backend().last_payload();
    assert_eq!(payload.params().image_seed, -1);
    assert_eq!(payload.params().image_number, 2);
    assert!(payload.params().async_process);

    let seeds: Vec<_> = result
        .images
        .iter()
        .map(|img| {
            assert!(img.downloaded);
            assert!(img.path.exists());
            let meta = OutputStore::read_metadata(&img.path).unwrap();
            assert_eq!(meta.prompt, "a red fox");
            assert_eq!(meta.job_id, "job-0001");
            assert!(meta.image_file.is_some());
            meta.seed.unwrap()
        })
        .collect();
    assert_eq!(seeds, vec![111, 222]);
    assert_eq!(sidecars(temp.path()).len(), 2);

    assert!(orch.registry().is_empty());
    assert_eq!(FakeBackend::count(&orch.backend().submits), 1);
    assert_eq!(FakeBackend::count(&orch.backend().polls), 4);
}

#[tokio::test(start_paused = true)]
async fn test_portrait_alias_resolved_before_submit() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::up(), temp.path(), settings());

    let result = orch
        .generate(GenerationRequest::new("a cat").with_aspect_ratio("Portrait"))
        .await
        .unwrap();

    assert_eq!(result.request.aspect_ratio, "896*1152");
    let payload = orch.backend().last_payload();
    assert_eq!(payload.params().aspect_ratios_selection, "896*1152");
}

#[tokio::test(start_paused = true)]
async fn test_image_count_capped() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::up(), temp.path(), settings());

    orch.generate(GenerationRequest::new("x").with_num_images(50.0))
        .await
        .unwrap();
    assert_eq!(orch.backend().last_payload().params().image_number, 4);
}

#[tokio::test(start_paused = true)]
async fn test_validation_error_never_admits() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::up(), temp.path(), settings());

    let err = orch.generate(GenerationRequest::new("  ")).await.unwrap_err();
    assert!(matches!(err, GenerationError::Validation(_)));
    assert_eq!(FakeBackend::count(&orch.backend().submits), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backend_down_never_submits() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::down(), temp.path(), settings());

    let err = orch.generate(GenerationRequest::new("a red fox")).await.unwrap_err();

    assert!(matches!(err, GenerationError::BackendUnavailable(_)));
    assert_eq!(FakeBackend::count(&orch.backend().starts), 1);
    assert_eq!(FakeBackend::count(&orch.backend().submits), 0);
    assert!(orch.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backend_down_without_auto_manage() {
    let temp = tempdir().unwrap();
    let mut s = settings();
    s.auto_manage = false;
    let orch = orchestrator(FakeBackend::launchable(), temp.path(), s);

    let err = orch.generate(GenerationRequest::new("x")).await.unwrap_err();

    assert!(matches!(err, GenerationError::BackendUnavailable(_)));
    assert_eq!(FakeBackend::count(&orch.backend().starts), 0);
    assert_eq!(FakeBackend::count(&orch.backend().submits), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backend_started_on_demand() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::launchable(), temp.path(), settings());

    orch.generate(GenerationRequest::new("x")).await.unwrap();

    assert_eq!(FakeBackend::count(&orch.backend().starts), 1);
    assert_eq!(FakeBackend::count(&orch.backend().submits), 1);
}

#[tokio::test(start_paused = true)]
async fn test_capacity_rejects_exactly_one_of_n_plus_one() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::up().held(), temp.path(), settings());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.generate(GenerationRequest::new(format!("job {}", i)))
                    .await
            })
        })
        .collect();

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(orch.registry().len() <= 3);
    }
    assert_eq!(orch.registry().len(), 3);
    orch.backend().release();

    let mut rejected = 0;
    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => completed += 1,
            Err(GenerationError::Capacity { active, limit }) => {
                assert_eq!((active, limit), (3, 3));
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(rejected, 1);
    assert_eq!(completed, 3);
    assert!(orch.registry().is_empty());
    assert_eq!(FakeBackend::count(&orch.backend().submits), 3);
}

#[tokio::test(start_paused = true)]
async fn test_backend_error_writes_no_sidecars() {
    let temp = tempdir().unwrap();
    let fake = FakeBackend::up().with_script(vec![running(0.2), failed("CUDA out of memory")]);
    let orch = orchestrator(fake, temp.path(), settings());

    let err = orch.generate(GenerationRequest::new("x")).await.unwrap_err();

    assert_eq!(err, GenerationError::JobError("CUDA out of memory".into()));
    assert!(sidecars(temp.path()).is_empty());
    assert!(orch.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_completed_without_images_is_job_error() {
    let temp = tempdir().unwrap();
    let fake = FakeBackend::up().with_seeds(&[]);
    let orch = orchestrator(fake, temp.path(), settings());

    let err = orch.generate(GenerationRequest::new("x")).await.unwrap_err();

    assert!(matches!(err, GenerationError::JobError(_)));
    assert!(sidecars(temp.path()).is_empty());
    assert!(orch.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_failures_are_retried() {
    let temp = tempdir().unwrap();
    let fake = FakeBackend::up().with_script(vec![
        transient(),
        running(0.4),
        transient(),
        transient(),
        transient(),
        transient(),
    ]);
    let orch = orchestrator(fake, temp.path(), settings());

    let result = orch.generate(GenerationRequest::new("x")).await;

    assert!(result.is_ok(), "{:?}", result.err());
    assert_eq!(FakeBackend::count(&orch.backend().polls), 7);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_poll_failures_escalate() {
    let temp = tempdir().unwrap();
    let fake = FakeBackend::up().with_script(vec![transient(); 10]);
    let mut s = settings();
    s.max_poll_failures = 3;
    let orch = orchestrator(fake, temp.path(), s);

    let err = orch.generate(GenerationRequest::new("x")).await.unwrap_err();

    assert!(matches!(err, GenerationError::BackendUnavailable(_)));
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(FakeBackend::count(&orch.backend().polls), 3);
    assert!(orch.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_job_timeout() {
    let temp = tempdir().unwrap();
    let mut s = settings();
    s.job_timeout = Some(Duration::from_secs(10));
    let orch = orchestrator(FakeBackend::up().held(), temp.path(), s);

    let started = tokio::time::Instant::now();
    let err = orch.generate(GenerationRequest::new("x")).await.unwrap_err();

    match err {
        GenerationError::Timeout { job_id, elapsed } => {
            assert_eq!(job_id, "job-0001");
            assert!(elapsed >= Duration::from_secs(10));
        }
        other => panic!("expected timeout, got {}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(15));
    assert!(orch.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_timeout_by_default() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::up().held(), temp.path(), settings());

    let job = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.generate(GenerationRequest::new("slow")).await })
    };
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(!job.is_finished());
    assert_eq!(orch.registry().len(), 1);

    orch.backend().release();
    assert!(job.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failed_download_still_writes_sidecar() {
    let temp = tempdir().unwrap();
    let fake = FakeBackend::up();
    fake.fail_downloads
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let orch = orchestrator(fake, temp.path(), settings());

    let result = orch.generate(GenerationRequest::new("x")).await.unwrap();

    let image = &result.images[0];
    assert!(!image.downloaded);
    assert!(!image.path.exists());
    let raw = std::fs::read_to_string(&image.metadata_path).unwrap();
    let meta: ImageMetadata = serde_json::from_str(&raw).unwrap();
    assert_eq!(meta.image_url.as_deref(), Some("http://fake:8888/files/4242.png"));
    assert!(meta.image_file.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_variation_sends_source_and_records_it() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("source.png");
    std::fs::write(&source, b"source-bytes").unwrap();
    let orch = orchestrator(FakeBackend::up(), temp.path(), settings());

    let result = orch
        .generate_variation(GenerationRequest::new("a red fox"), &source, VaryStrength::Strong)
        .await
        .unwrap();

    match orch.backend().last_payload() {
        JobPayload::Variation(v) => {
            assert_eq!(v.uov_method, "Vary (Strong)");
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(&v.input_image)
                .unwrap();
            assert_eq!(decoded, b"source-bytes");
        }
        other => panic!("expected variation payload, got {:?}", other),
    }
    let meta = OutputStore::read_metadata(&result.images[0].path).unwrap();
    assert_eq!(meta.source_image, Some(source.display().to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_variation_missing_source_is_validation_error() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::up(), temp.path(), settings());

    let err = orch
        .generate_variation(
            GenerationRequest::new("x"),
            &temp.path().join("missing.png"),
            VaryStrength::Subtle,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Validation(_)));
    assert_eq!(FakeBackend::count(&orch.backend().submits), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_shutdown_after_last_job() {
    let temp = tempdir().unwrap();
    let mut s = settings();
    s.idle_shutdown = Some(Duration::from_secs(60));
    let orch = orchestrator(FakeBackend::launchable(), temp.path(), s);

    orch.generate(GenerationRequest::new("x")).await.unwrap();
    assert!(orch.idle_shutdown_pending());

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(FakeBackend::count(&orch.backend().stops), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(FakeBackend::count(&orch.backend().stops), 1);
    assert!(!orch.idle_shutdown_pending());
}

#[tokio::test(start_paused = true)]
async fn test_new_job_cancels_pending_idle_shutdown() {
    let temp = tempdir().unwrap();
    let mut s = settings();
    s.idle_shutdown = Some(Duration::from_secs(60));
    let orch = orchestrator(FakeBackend::launchable(), temp.path(), s);

    orch.generate(GenerationRequest::new("first")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    // second job takes one 2s poll, then re-arms the timer
    orch.generate(GenerationRequest::new("second")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(FakeBackend::count(&orch.backend().stops), 0);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(FakeBackend::count(&orch.backend().stops), 1);
}

#[tokio::test(start_paused = true)]
async fn test_job_admitted_during_idle_stop_restarts_backend() {
    let temp = tempdir().unwrap();
    let mut s = settings();
    s.idle_shutdown = Some(Duration::from_secs(60));
    let fake = FakeBackend::launchable().with_stop_delay(Duration::from_secs(5));
    let orch = orchestrator(fake, temp.path(), s);

    orch.generate(GenerationRequest::new("first")).await.unwrap();
    assert_eq!(FakeBackend::count(&orch.backend().starts), 1);

    // Idle stop begins at 60s and takes 5s to finish.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(FakeBackend::count(&orch.backend().stops), 1);

    // This admission cancels the idle timer mid-stop.
    let result = orch.generate(GenerationRequest::new("second")).await;
    assert!(result.is_ok(), "{:?}", result);

    // The stop ran to completion and the job brought the backend back.
    assert_eq!(FakeBackend::count(&orch.backend().stops), 1);
    assert_eq!(FakeBackend::count(&orch.backend().starts), 2);
    let status = orch.backend().status().await;
    assert!(status.reachable);
    assert_eq!(status.managed_pid, Some(4242));
}

#[tokio::test(start_paused = true)]
async fn test_idle_shutdown_leaves_external_backend_alone() {
    let temp = tempdir().unwrap();
    let mut s = settings();
    s.idle_shutdown = Some(Duration::from_secs(10));
    let orch = orchestrator(FakeBackend::up(), temp.path(), s);

    orch.generate(GenerationRequest::new("x")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(FakeBackend::count(&orch.backend().stops), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_new_jobs_and_stops_backend() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::launchable(), temp.path(), settings());
    orch.generate(GenerationRequest::new("warm up")).await.unwrap();

    orch.shutdown(Duration::from_secs(5)).await;

    assert!(!orch.is_accepting());
    assert_eq!(FakeBackend::count(&orch.backend().stops), 1);
    let err = orch.generate(GenerationRequest::new("x")).await.unwrap_err();
    assert_eq!(err, GenerationError::ShuttingDown);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_active_jobs_up_to_grace() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::launchable().held(), temp.path(), settings());

    let job = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.generate(GenerationRequest::new("slow")).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(orch.registry().len(), 1);

    let started = tokio::time::Instant::now();
    orch.shutdown(Duration::from_secs(30)).await;
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(FakeBackend::count(&orch.backend().stops), 1);

    job.abort();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_returns_when_jobs_drain() {
    let temp = tempdir().unwrap();
    let orch = orchestrator(FakeBackend::up().held(), temp.path(), settings());

    let job = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.generate(GenerationRequest::new("slow")).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    let releaser = {
        let orch = orch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            orch.backend().release();
        })
    };

    let started = tokio::time::Instant::now();
    orch.shutdown(Duration::from_secs(60)).await;
    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(job.await.unwrap().is_ok());
    releaser.await.unwrap();
}
