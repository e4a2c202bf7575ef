use chappie_bot::config::Config;
use chappie_bot::connection::{ConnectionManager, CredentialStore, FileCredentialStore, RunExit};
use chappie_bot::dispatcher::Dispatcher;
use chappie_bot::error::BotError;
use chappie_bot::models::BotConfig;
use chappie_bot::plugins::PluginSet;
use chappie_bot::quota::InMemoryQuotaStore;
use chappie_bot::registry::{watch, HandlerCatalog, HandlerRegistry};
use chappie_bot::transport::bridge::BridgeTransport;
use chappie_bot::transport::AuthMode;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), BotError> {
    dotenv().ok();
    env_logger::init();

    let mode = AuthMode::from_arg(std::env::args().nth(1).as_deref());
    let config = Config::from_env();

    log::info!("CHAPPIE BOT v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Mode: {}", mode);
    log::info!("Bot config: {}", config.bot_config_path.display());
    log::info!("Commands directory: {}", config.commands_dir.display());

    let bot_config = BotConfig::load_from(&config.bot_config_path);
    bot_config.validate()?;
    let bot_config = Arc::new(bot_config);

    std::fs::create_dir_all(&config.commands_dir)?;

    let registry = Arc::new(HandlerRegistry::new(
        &config.commands_dir,
        HandlerCatalog::with_builtins(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        bot_config.clone(),
        registry.clone(),
        Arc::new(InMemoryQuotaStore::new()),
    ));
    let plugins = Arc::new(PluginSet::builtin(&bot_config));
    let credentials = Arc::new(FileCredentialStore::new(&config.auth_file));
    let transport = Arc::new(BridgeTransport::new(config.bridge_url.clone()));

    let manager = Arc::new(ConnectionManager::new(
        bot_config.clone(),
        transport,
        credentials.clone(),
        dispatcher,
        plugins,
        &config.commands_dir,
    ));
    let cancel = manager.cancellation_token();

    // Hot reload of the commands directory.
    let (reload_tx, reload_rx) = mpsc::unbounded_channel();
    let _watcher = match watch::spawn_watcher(&config.commands_dir, reload_tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            log::warn!("Command hot reload disabled: {}", e);
            None
        }
    };
    let reload_task = tokio::spawn(watch::run_reload_loop(
        registry,
        reload_rx,
        bot_config.reload_debounce(),
        cancel.clone(),
    ));

    let shutdown_manager = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C, shutting down...");
            shutdown_manager.shutdown();
        }
    });

    let result = manager.run(mode).await;
    cancel.cancel();
    let _ = reload_task.await;

    match result? {
        RunExit::Shutdown => log::info!("Bye"),
        RunExit::LoggedOut => {
            if let Err(e) = credentials.clear() {
                log::error!("Failed to remove {}: {}", config.auth_file.display(), e);
            }
            log::error!("Session logged out. Start again with `qr` to pair this device.");
        }
        RunExit::GaveUp { attempts } => {
            log::error!("Could not reconnect after {} attempts, exiting", attempts);
        }
        RunExit::PairingAborted => {
            log::warn!("Pairing was not completed. Start again with `qr` to retry.");
        }
    }
    Ok(())
}
