//! The `serve` command: the long-running service.

use tracing::{error, info};

use crate::app::App;
use crate::config::Settings;
use crate::server;
use crate::watcher;

pub async fn cmd_serve(settings: Settings) -> anyhow::Result<()> {
    let app = App::bootstrap(settings).await?;
    info!("photos directory: {}", app.settings.photos_dir.display());
    info!("data directory: {}", app.settings.data_dir.display());

    let _workers = app.start_workers();
    let _coordinator = app.start_events_coordinator();

    // Initial scan runs in the background and feeds the pipeline.
    if !app.ingest.try_start_scan() {
        error!("initial scan could not start");
    }

    // Live producer for files appearing while we run.
    let _watcher = watcher::start_watcher(
        app.settings.clone(),
        app.pipeline.clone(),
        app.ingest.scanner(),
    );

    let result = server::serve(app.app_state()).await;

    app.shutdown();
    result
}
