use chrono::Local;
use evalcrawl::{info_time, process::process_site, Result};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let start_time = Local::now();
    let summary = process_site().await?;
    info_time!(start_time, "Full program time: {:?}", summary);

    Ok(())
}
