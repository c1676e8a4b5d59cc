//! Fetch the top N best stories and print them as JSON.
//!
//! Usage: `cargo run --example best_stories -- [COUNT] [SETTINGS.json]`
use beststories::prelude::*;
use beststories::Settings;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let count = match args.next() {
        Some(raw) => raw.parse().map_err(|_| Error::Validation(format!("not a number: {raw}")))?,
        None => 10,
    };
    let settings = match args.next() {
        Some(path) => Settings::from_path(path)?,
        None => Settings::default(),
    };

    let handler = BestStoriesHandler::from_settings(&settings)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let response = handler.handle(GetBestStoriesQuery::new(count), &cancel).await?;
    let json = serde_json::to_string_pretty(&response)
        .map_err(|e| Error::MalformedResponse(e.to_string()))?;
    println!("{json}");
    Ok(())
}
