use clap::Parser;
use tracing::{error, info, warn};

use rondo_switch::cli::{self, Cli, Commands};
use rondo_switch::config::Config;
use rondo_switch::recorder::Recorder;
use rondo_switch::{build_state, router};

#[tokio::main]
async fn main() {
    // Initialize tracing with environment-based configuration
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Check if running as probe client
    if let Some(Commands::Probe { url, participant }) = cli.command {
        if let Err(err) = cli::run_probe(url, participant).await {
            error!("probe failed: {err:#}");
            std::process::exit(1);
        }
        return;
    }

    // Otherwise, run as server
    let config = Config::from_env();
    info!("starting rondo-switch on port {}", config.port);
    info!(
        "fallback: wait {:?} + {:?}, synthetic probability {}",
        config.match_wait, config.synthetic_extra_wait, config.synthetic_match_probability
    );

    // Persistence is best-effort: a missing store degrades, it does not
    // prevent startup.
    let recorder = match Recorder::connect(&config.redis_url).await {
        Ok(recorder) => {
            info!("match recorder connected to {}", config.redis_url);
            recorder
        }
        Err(err) => {
            warn!(%err, "redis unavailable; running with persistence disabled");
            Recorder::disabled()
        }
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let state = build_state(config, recorder);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("rondo-switch listening on {}", addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
