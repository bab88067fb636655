//! End-to-end lifecycle scenarios against the in-memory engine.
//!
//! These drive the public orchestrator API the same way the binary does,
//! without needing a container daemon.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use whale::container::engine::{ImageRecord, RawEvent};
use whale::container::naming::encode_container;
use whale::container::testing::{EngineCall, MemoryEngine};
use whale::container::{
    ContainerError, ContainerOrchestrator, ContainerOrchestratorConfig, LogOptions, NameCache,
    RegistryAuth, ResourceState, StartOptions, StopOptions,
};
use whale::stream::{Channel, ProgressEvent, encode_frame};

fn setup() -> (Arc<MemoryEngine>, ContainerOrchestrator<MemoryEngine>) {
    let engine = Arc::new(MemoryEngine::new());
    let orchestrator = ContainerOrchestrator::with_engine(
        Arc::clone(&engine),
        ContainerOrchestratorConfig {
            stop_timeout: Duration::from_secs(2),
        },
    );
    (engine, orchestrator)
}

#[tokio::test]
async fn test_full_lifecycle_for_a_spaced_name() {
    let (engine, orchestrator) = setup();
    let name = "my web server";
    let id = encode_container(name);

    let options = StartOptions::builder()
        .image("nginx:1.25")
        .port("80", "8080")
        .env("MODE", "prod")
        .build()
        .unwrap();

    assert_eq!(orchestrator.state(name).await.unwrap(), ResourceState::Absent);
    orchestrator.start(name, &options).await.unwrap();
    assert_eq!(orchestrator.state(name).await.unwrap(), ResourceState::Running);
    assert_eq!(engine.image_of(&id).as_deref(), Some("nginx:1.25"));

    let listed = orchestrator.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, name);

    let detail = orchestrator.inspect(name).await.unwrap();
    assert_eq!(detail.encoded_id, id);
    assert_eq!(detail.image, "nginx:1.25");
    assert_eq!(detail.network.as_deref(), Some("bridge"));
    assert_eq!(detail.ports.get("80").map(String::as_str), Some("8080"));
    assert_eq!(detail.env.get("MODE").map(String::as_str), Some("prod"));

    orchestrator.restart(name, &StartOptions::default()).await.unwrap();
    assert_eq!(engine.image_of(&id).as_deref(), Some("nginx:1.25"));
    assert_eq!(orchestrator.state(name).await.unwrap(), ResourceState::Running);

    orchestrator.stop(name, &StopOptions::default()).await.unwrap();
    assert_eq!(orchestrator.state(name).await.unwrap(), ResourceState::Absent);
    assert!(
        engine
            .calls()
            .contains(&EngineCall::Stop(id.clone(), Duration::from_secs(2)))
    );
}

#[tokio::test]
async fn test_second_start_is_idempotent_only_when_forced() {
    let (engine, orchestrator) = setup();
    orchestrator.start("redis", &StartOptions::default()).await.unwrap();
    let mutations = engine.mutations().len();

    let err = orchestrator
        .start("redis", &StartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ContainerError::Conflict(_)));

    let forced = StartOptions::builder().force(true).build().unwrap();
    orchestrator.start("redis", &forced).await.unwrap();
    assert_eq!(engine.mutations().len(), mutations);
}

#[tokio::test]
async fn test_crashed_container_is_recycled() {
    let (engine, orchestrator) = setup();
    orchestrator.start("worker", &StartOptions::default()).await.unwrap();
    engine.set_running("worker", false);
    assert_eq!(orchestrator.state("worker").await.unwrap(), ResourceState::Stopped);

    orchestrator.start("worker", &StartOptions::default()).await.unwrap();
    assert_eq!(engine.is_running("worker"), Some(true));
}

#[tokio::test]
async fn test_unremovable_container_exhausts_recovery() {
    let (engine, orchestrator) = setup();
    engine.add_container("worker", "worker", false);
    engine.set_sticky_removals(true);

    let err = orchestrator
        .start("worker", &StartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ContainerError::RecoveryExhausted(_)));
}

#[tokio::test]
async fn test_stop_of_absent_container() {
    let (_engine, orchestrator) = setup();
    let err = orchestrator
        .stop("ghost", &StopOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    orchestrator.stop("ghost", &StopOptions::forced()).await.unwrap();
}

#[tokio::test]
async fn test_clean_keeps_running_containers_and_tagged_images() {
    let (engine, orchestrator) = setup();
    orchestrator.start("keep", &StartOptions::default()).await.unwrap();
    engine.add_container("exited", "alpine", false);
    engine.add_image(ImageRecord {
        id: "sha256:tagged".to_string(),
        repo_tags: vec!["alpine:latest".to_string()],
        ..Default::default()
    });
    engine.add_image(ImageRecord {
        id: "sha256:dangling".to_string(),
        repo_tags: vec!["<none>:<none>".to_string()],
        ..Default::default()
    });

    let report = orchestrator.clean().await.unwrap();
    assert_eq!(report.images_removed, 1);
    assert_eq!(report.containers_removed, 1);
    assert_eq!(engine.image_ids(), vec!["sha256:tagged".to_string()]);
    assert_eq!(engine.is_running("keep"), Some(true));
    assert_eq!(engine.is_running("exited"), None);
}

#[tokio::test]
async fn test_logs_are_split_by_channel() {
    let (engine, orchestrator) = setup();
    orchestrator.start("app", &StartOptions::default()).await.unwrap();

    let mut frames = encode_frame(Channel::Stdout, b"hello ").to_vec();
    frames.extend_from_slice(&encode_frame(Channel::Stderr, b"oops\n"));
    frames.extend_from_slice(&encode_frame(Channel::Stdout, b"world\n"));
    // Frame boundaries do not line up with chunk boundaries.
    let (head, tail) = frames.split_at(5);
    engine.set_log_frames(vec![
        bytes::Bytes::copy_from_slice(head),
        bytes::Bytes::copy_from_slice(tail),
    ]);

    let output = orchestrator
        .logs("app", &LogOptions { all: true, follow: false })
        .await
        .unwrap();
    let (stdout, stderr) = tokio::join!(output.stdout.read_to_end(), output.stderr.read_to_end());
    assert_eq!(stdout.unwrap(), b"hello world\n");
    assert_eq!(stderr.unwrap(), b"oops\n");
}

#[tokio::test]
async fn test_pull_uses_configured_credentials() {
    let (engine, orchestrator) = setup();
    engine.set_progress(vec![
        ProgressEvent::status("Pulling from library/alpine"),
        ProgressEvent::layer("a1", "Downloading").with_progress("[=>  ]"),
        ProgressEvent::layer("b2", "Waiting"),
        ProgressEvent::layer("a1", "Pull complete"),
    ]);

    let images = orchestrator.images().with_default_auth(RegistryAuth {
        username: Some("ci".to_string()),
        password: Some("secret".to_string()),
        ..Default::default()
    });
    let views: Vec<String> = images
        .pull("alpine@3.19", &RegistryAuth::default())
        .await
        .unwrap()
        .map(|v| v.unwrap())
        .collect()
        .await;

    assert_eq!(views.len(), 4);
    let last = views.last().unwrap();
    let lines: Vec<&str> = last.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("a1 Pull complete"));
    assert!(lines[2].starts_with("b2 Waiting"));

    assert!(
        engine
            .calls()
            .contains(&EngineCall::Pull("alpine".to_string(), "3.19".to_string()))
    );
    assert_eq!(engine.last_auth().unwrap().username.as_deref(), Some("ci"));
}

#[tokio::test]
async fn test_pull_error_ends_the_stream() {
    let (engine, orchestrator) = setup();
    engine.set_progress(vec![
        ProgressEvent::status("Pulling from library/nope"),
        ProgressEvent::failure("manifest unknown"),
        ProgressEvent::status("never seen"),
    ]);

    let results: Vec<_> = orchestrator
        .images()
        .pull("nope", &RegistryAuth::default())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(&results[1], Err(ContainerError::Protocol(m)) if m == "manifest unknown"));
}

#[tokio::test]
async fn test_event_feed_resolves_names_once() {
    let (engine, orchestrator) = setup();
    engine.add_named_container("0123456789abcdef", "api", "redis", true);
    let event = |status: &str| RawEvent {
        status: status.to_string(),
        id: "0123456789abcdef".to_string(),
        from: Some("redis".to_string()),
        time: 1_714_564_800,
    };
    engine.set_events(vec![event("create"), event("start"), event("die")]);

    let cache = NameCache::new();
    let events: Vec<_> = orchestrator
        .events(Some(cache.clone()))
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.id == "0123456789ab"));
    assert_eq!(events[2].status, "die");
    assert_eq!(events[0].name.as_deref(), Some("api"));
    assert_eq!(engine.inspect_count("0123456789abcdef"), 1);
    assert_eq!(cache.len(), 1);
}
