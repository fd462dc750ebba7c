/*!
Here we go!
*/
use std::sync::Arc;
use std::time::Duration;

use simplelog::{ColorChoice, TerminalMode, TermLogger};
use tokio::sync::RwLock;

use registrar::config;
use registrar::inter;

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("registrar")
        .build();
    if let Err(e) = TermLogger::init(
        registrar::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ) {
        eprintln!("Unable to start logging: {}", &e);
    }
    log::info!("Logging started.");

    let cfg_path = std::env::args().nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_owned());
    let cfg = if std::path::Path::new(&cfg_path).exists() {
        match config::Cfg::from_file(&cfg_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!("{}", &e);
                std::process::exit(1);
            },
        }
    } else {
        log::warn!("No config file at {:?}; using default configuration.", &cfg_path);
        config::Cfg::default()
    };
    log::info!("Configuration:\n{:#?}", &cfg);

    let glob = match config::load_configuration(&cfg).await {
        Ok(glob) => glob,
        Err(e) => {
            log::error!("Error loading configuration: {}", &e);
            std::process::exit(1);
        },
    };
    if let Err(e) = inter::init(&cfg.templates_dir) {
        log::error!("Error initializing templates: {}", &e);
        std::process::exit(1);
    }

    let glob = Arc::new(RwLock::new(glob));

    let pruner = glob.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let n = pruner.write().await.sessions.prune();
            if n > 0 {
                log::debug!("Pruned {} expired sessions.", n);
            }
        }
    });

    let app = inter::router(glob, &cfg.static_dir);

    log::info!("Listening on {}", &cfg.addr);

    if let Err(e) = axum::Server::bind(&cfg.addr)
        .serve(app.into_make_service())
        .await
    {
        log::error!("Server error: {}", &e);
        std::process::exit(1);
    }
}
