//! Container Lifecycle.
//!
//! This example demonstrates:
//! 1. Downloading a droplet and a lifecycle bundle in parallel, under a timeout
//! 2. Running a long-lived process codependently with its health monitor
//! 3. Stopping the whole tree from a separate task
//!
//! The container backend, cache and uploader are in-memory stand-ins.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vessel::prelude::*;
use vessel_core::test_utils::{BufferStreamer, FakeCache, FakeContainer, FakeStep, FakeUploader, Gate};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = InterpreterConfig {
        max_concurrent_downloads: 2,
        ..InterpreterConfig::default()
    };
    let throttles = Throttles::from_config(&config)?;

    let container = Arc::new(FakeContainer::new().with_stream_out("crash logs"));
    let cache = Arc::new(FakeCache::new(vec![0u8; 48 * 1024]));
    let streamer = BufferStreamer::new();
    let log: Arc<dyn LogStreamer> = Arc::new(streamer.clone());

    let download = |from: &str, to: &str, artifact: &str| -> Arc<dyn Step> {
        Arc::new(DownloadStep::new(
            DownloadAction::new(from, to, "vcap")
                .with_cache_key(artifact)
                .with_artifact(artifact),
            container.clone(),
            cache.clone(),
            log.clone(),
            throttles.downloads.clone(),
        ))
    };

    let setup = EmitProgressStep::new(
        Arc::new(TimeoutStep::new(
            Arc::new(ParallelStep::new(vec![
                download("https://blobstore.internal/droplet.tgz", "/home/vcap", "droplet"),
                download("https://blobstore.internal/lifecycle.tgz", "/tmp/lifecycle", "lifecycle"),
            ])),
            Duration::from_secs(30),
        )),
        log.clone(),
    )
    .with_start_message("Setting up container")
    .with_success_message("Container setup complete")
    .with_failure_message("Container setup failed");

    // The "process" runs until the gate opens, like a server until it is stopped.
    let process = Arc::new(FakeStep::succeeding().with_gate(Gate::new()));
    let (healthy_tx, mut healthy_rx) = mpsc::channel(1);
    let monitor = MonitorStep::builder(
        || Arc::new(FakeStep::succeeding()) as Arc<dyn Step>,
        log.clone(),
        throttles.health_checks.clone(),
    )
    .unhealthy_interval(Duration::from_millis(50))
    .healthy_interval(Duration::from_millis(200))
    .start_timeout(Duration::from_secs(5))
    .on_healthy(healthy_tx)
    .build()?;

    let collect_logs = TryStep::new(Arc::new(UploadStep::new(
        UploadAction::new("/home/vcap/logs", "https://cc.internal/logs/app", "vcap")
            .with_artifact("logs"),
        container.clone(),
        Arc::new(FakeUploader::new()),
        log.clone(),
        throttles.uploads.clone(),
        config.temp_dir.clone(),
    )));

    let root = Arc::new(SerialStep::new(vec![
        Arc::new(setup),
        Arc::new(CodependentStep::new(vec![process, Arc::new(monitor)], true)),
        Arc::new(collect_logs),
    ]));

    let running = tokio::spawn({
        let root = Arc::clone(&root);
        async move { root.perform().await }
    });

    if healthy_rx.recv().await.is_some() {
        println!("container reported healthy, stopping it");
    }
    root.cancel();

    match running.await? {
        Ok(()) => println!("action tree completed"),
        Err(err) if err.is_cancelled() => println!("action tree cancelled"),
        Err(StepError::Multiple(group)) if group.iter().all(StepError::is_cancelled) => {
            println!("action tree cancelled")
        }
        Err(err) => println!("action tree failed: {}", err),
    }

    println!("\n--- container stdout ---\n{}", streamer.stdout_text());
    println!("--- container stderr ---\n{}", streamer.stderr_text());

    throttles.health_checks.shutdown();
    Ok(())
}
