//! The `scan` command: one full scan-and-enrich pass in the foreground.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::app::App;
use crate::config::Settings;
use crate::pipeline::{CorpusPass, Stage, StageOutcome};
use crate::services::{DuplicateGroupingPass, EventDetectionPass, FaceClusteringPass};

pub async fn cmd_scan(settings: Settings) -> anyhow::Result<()> {
    let app = App::bootstrap(settings).await?;
    let _workers = app.start_workers();

    // Progress bar fed by the same scan-state channel the websocket uses.
    let mut rx = app.ingest.scan_state().subscribe();
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let bar_task = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while let Ok(snapshot) = rx.recv().await {
                bar.set_length(snapshot.total_files as u64);
                bar.set_position(snapshot.processed_files as u64);
                if let Some(current) = snapshot.current_file {
                    bar.set_message(current);
                }
                if !snapshot.is_scanning {
                    break;
                }
            }
        })
    };

    let stats = app
        .ingest
        .run_scan()
        .await
        .ok_or_else(|| anyhow::anyhow!("a scan is already running"))?;
    let _ = bar_task.await;
    bar.finish_with_message(format!(
        "{} files, {} new, {} updated, {} skipped, {} errors",
        stats.total, stats.new, stats.updated, stats.skipped, stats.errors
    ));

    // Without the long-lived coordinator, drain the terminal queue here
    // and wait for the per-item stages to settle.
    let events_queue = app.pipeline.queue(Stage::Events);
    loop {
        while let Some(key) = events_queue.take(Duration::from_millis(500)).await {
            events_queue.finish(&key, StageOutcome::Completed);
        }
        if app.pipeline.is_quiescent() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // Terminal batch operations, in order, then the duplicate pass.
    let persons = FaceClusteringPass::new(app.store.faces()).run().await?;
    let events = EventDetectionPass::new(app.store.photos(), app.store.events())
        .run()
        .await?;
    let groups = DuplicateGroupingPass::new(app.store.duplicates())
        .run()
        .await?;

    info!(
        "enrichment complete: {} new persons, {} events, {} duplicate groups",
        persons, events, groups
    );

    app.shutdown();
    Ok(())
}
