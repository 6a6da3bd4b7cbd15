//! The `duplicates` command: recompute and print duplicate groups.

use crate::app::App;
use crate::config::Settings;
use crate::pipeline::CorpusPass;
use crate::services::DuplicateGroupingPass;

pub async fn cmd_duplicates(settings: Settings) -> anyhow::Result<()> {
    let app = App::bootstrap(settings).await?;

    let pass = DuplicateGroupingPass::new(app.store.duplicates());
    let count = pass.run().await?;
    println!("{count} duplicate groups");

    for group in app.store.duplicates().list_groups().await? {
        println!("group {}:", group.group_id);
        for member in &group.members {
            match app.store.photos().get(member).await? {
                Some(photo) => println!("  {}  {}", member, photo.file_path),
                None => println!("  {}", member),
            }
        }
    }
    Ok(())
}
