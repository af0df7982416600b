//! moneyez - MoneyEZ financial assistant service

use clap::Parser;
use moneyez_server::config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MoneyEZ financial assistant HTTP service
#[derive(Parser, Debug)]
#[command(name = "moneyez")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: $MONEYEZ_CONFIG or the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.bind`
    #[arg(short, long)]
    bind: Option<String>,

    /// Debug logging for moneyez crates
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path);
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    if args.print_config {
        let mut shown = config.clone();
        if shown.api_keys.google.is_some() {
            shown.api_keys.google = Some("<redacted>".into());
        }
        if !shown.server.external_secret.is_empty() {
            shown.server.external_secret = "<redacted>".into();
        }
        print!("{}", shown.to_toml()?);
        return Ok(());
    }

    let filter = if args.verbose {
        EnvFilter::new("moneyez_server=debug,moneyez_agent=debug,moneyez_ai=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.server.log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(config = %config_path.display(), "configuration loaded");

    let state = moneyez_server::build_state(&config).await?;
    let app = moneyez_server::routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("MoneyEZ listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}
