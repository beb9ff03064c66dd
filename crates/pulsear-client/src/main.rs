use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{info, warn};

use pulsear_client::{Client, ClientConfig, EventUi, LocalFile, Phase, UiEvent};
use pulsear_transfer::TracingLogger;
use pulsear_types::human_size;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulsear_client=info,pulsear_transfer=info".into()),
        )
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        bail!("usage: pulsear-upload <file>...");
    }

    // Config
    let config = ClientConfig::from_env()?;
    if config.username.is_empty() {
        bail!("PULSEAR_USERNAME is not set");
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = LocalFile::from_path(path)
            .await
            .with_context(|| format!("cannot read {}", path))?;
        info!("{} ({})", file.name, human_size(file.size));
        files.push(file);
    }

    let mut ui = EventUi::new();
    let mut ui_events = ui.subscribe();
    let (mut client, handle) = Client::new(config, Box::new(ui), Arc::new(TracingLogger))?;
    let mut outcomes = client.subscribe_outcomes();
    let shutdown = client.shutdown_token();
    let session = client.session();
    let runner = tokio::spawn(client.run());

    tokio::spawn(async move {
        while let Some(event) = ui_events.recv().await {
            match event {
                UiEvent::Notify { important: true, text } => warn!("{}", text),
                UiEvent::Notify { text, .. } => info!("{}", text),
                UiEvent::Progress { row, fraction, done, .. } => {
                    info!(row = row.0, done, "{:.1}%", fraction * 100.0)
                }
                UiEvent::RowCreated { .. } => {}
            }
        }
    });

    let total = files.len();
    let mut pending = HashSet::new();
    for file in files {
        let name = file.name.clone();
        match handle.upload(file).await {
            Ok(id) => {
                info!("announced {} as {}", name, id);
                pending.insert(id);
            }
            Err(e) => warn!("{}: {}", name, e),
        }
    }

    let mut failed = total - pending.len();
    while !pending.is_empty() {
        tokio::select! {
            outcome = outcomes.recv() => {
                let Some(outcome) = outcome else { break };
                if pending.remove(&outcome.content_id) && outcome.phase != Phase::Done {
                    failed += 1;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, {} uploads unfinished", pending.len());
                failed += pending.len();
                shutdown.cancel();
                break;
            }
        }
    }

    if let Some(dashboard) = session.dashboard() {
        info!(
            "storage left: {} of {}",
            human_size(dashboard.left_storage),
            human_size(dashboard.user_max_storage)
        );
    }

    let _ = handle.leave();
    match tokio::time::timeout(Duration::from_secs(5), runner).await {
        Ok(result) => result??,
        Err(_) => shutdown.cancel(),
    }

    if failed > 0 {
        bail!("{} of {} uploads failed", failed, total);
    }
    Ok(())
}
