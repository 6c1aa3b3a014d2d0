use dotenvy::dotenv;
use env_logger::Env;
use log::{error, info};
use relay_server::{
    Relay, change_listener::postgres::PgNotificationSource, config::RelayConfig,
};
use std::process;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!("Invalid configuration: {error}");
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind((config.bind_address, config.port)).await {
        Ok(listener) => listener,
        Err(error) => {
            error!("Could not bind relay on port {}: {error}", config.port);
            process::exit(1);
        }
    };

    info!("Realtime relay listening on port {}", config.port);

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!("Could not listen for shutdown signal: {error}");
            return;
        }

        info!("Shutting down");
        signal_shutdown.cancel();
    });

    let source =
        PgNotificationSource::new(config.database_url.clone(), config.notify_channel.clone());
    Relay::new(config).run(source, listener, shutdown).await;
}
