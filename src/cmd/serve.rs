//! Tracker server command — `doorstep serve`.

use anyhow::Result;

use doorstep::canvass::db::TrackerDb;
use doorstep::canvass::server::{ServerConfig, start_server};

/// Initialize the database and exit.
pub fn cmd_init_db(db_path: &std::path::Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    TrackerDb::new(db_path)?;
    println!("Tracker database initialized at {}", db_path.display());
    Ok(())
}

pub async fn cmd_serve(
    port: u16,
    db_path: std::path::PathBuf,
    open: bool,
    dev: bool,
) -> Result<()> {
    // Spawn browser open before starting the server (which blocks).
    // Skip in dev mode (no browser inside containers).
    if open && !dev {
        let url = format!("http://localhost:{}", port);
        tokio::spawn(async move {
            // Small delay to let the server start binding
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                eprintln!("Failed to open browser: {}", e);
            }
        });
    }

    start_server(ServerConfig {
        port,
        db_path,
        dev_mode: dev,
    })
    .await?;

    Ok(())
}
