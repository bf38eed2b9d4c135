//! Social graph backend: accounts, follows, posts with likes and comments.
//!
//! Every account list (`followers`, `following`, `likes`) is kept with set
//! semantics through atomic per-document updates, and removing an account
//! runs as a resumable cascade (see [`deletion`]) so no other document is
//! left pointing at it.

use actix_web::{web, App, HttpServer};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

pub mod auth;
pub mod config;
pub mod core;
pub mod deletion;
pub mod follow;
pub mod handlers;
pub mod media;
pub mod models;
pub mod notifier;
pub mod posts;
pub mod state;
pub mod users;

use config::Config;
use state::AppState;

pub fn init_tracing() {
    let _ = fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
}

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let address = config.address();
    let state = AppState::from_config(config)?;

    match deletion::resume_pending(&state).await {
        Ok(0) => {}
        Ok(n) => info!(finished = n, "Resumed interrupted account deletions"),
        Err(e) => error!(error = %e, "Failed to resume account deletions"),
    }

    let data = web::Data::new(state);
    info!("Binding to {address}");

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(handlers::configure)
    })
    .bind(&address)?
    .run()
    .await?;

    info!("Server shutting down...");
    Ok(())
}
