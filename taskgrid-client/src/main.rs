//! TASKGRID client entry point.

use std::sync::Arc;
use taskgrid_client::api_client::RestStore;
use taskgrid_client::app::ClientApp;
use taskgrid_client::commands::Command;
use taskgrid_client::config::ClientConfig;
use taskgrid_client::error::ClientError;
use taskgrid_client::events::ClientEvent;
use taskgrid_client::notify::NotifyClient;
use taskgrid_client::persistence::{self, PersistedState};
use taskgrid_client::realtime::RealtimeFeed;
use taskgrid_core::SessionContext;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let config = ClientConfig::load()?;
    init_tracing(&config);

    let session = SessionContext::signed_in(config.current_user());
    let store = Arc::new(RestStore::new(&config)?);
    let feed = Arc::new(RealtimeFeed::spawn(&config)?);
    let notifier = Arc::new(NotifyClient::new(&config, session.clone())?);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let mut app = ClientApp::new(
        store,
        feed,
        notifier,
        session,
        config.write_debounce(),
        event_tx.clone(),
    );

    let preferred = match persistence::load(&config.state_path) {
        Ok(state) => state.and_then(|s| s.last_project_id),
        Err(err) => {
            warn!(error = %err, "Ignoring unreadable client state");
            None
        }
    };
    match app.choose_project(preferred).await? {
        Some(project_id) => app.open_project(project_id).await?,
        None => info!("No projects yet; use `open <project-id>` once you are invited"),
    }

    spawn_input_reader(event_tx);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                if !app.handle(event).await {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }
    }

    let persisted = PersistedState {
        last_project_id: app.shutdown().await,
    };
    if let Err(err) = persistence::save(&config.state_path, &persisted) {
        warn!(error = %err, "Failed to save client state");
    }
    Ok(())
}

fn init_tracing(config: &ClientConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log_filter.as_deref().unwrap_or("info"))
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn spawn_input_reader(sender: mpsc::UnboundedSender<ClientEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match Command::parse(&line) {
                    Ok(command) => {
                        if sender.send(ClientEvent::Input(command)).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "Unrecognised input"),
                },
                Ok(None) => {
                    let _ = sender.send(ClientEvent::InputClosed);
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "Failed to read input");
                    let _ = sender.send(ClientEvent::InputClosed);
                    break;
                }
            }
        }
    });
}
