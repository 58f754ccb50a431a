use aidesk_common::elapsed::format_elapsed;
use aidesk_core::config::Config;
use aidesk_core::config::ConfigOverrides;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// aidesk, a self-hosted team AI workspace
#[derive(Debug, Parser)]
#[clap(author, version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the HTTP server.
    #[clap(visible_alias = "s")]
    Serve(ServeArgs),

    /// Print the effective configuration and check the environment.
    Doctor,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    /// Listen address, e.g. 0.0.0.0:8787.
    #[arg(long)]
    bind: Option<String>,

    /// Default model provider for chat requests.
    #[arg(long)]
    provider: Option<String>,

    /// Default model for chat requests.
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let started = chrono::Utc::now();
            let config = Config::load(ConfigOverrides {
                provider: args.provider,
                model: args.model,
                bind_addr: args.bind,
            })?;
            let result = aidesk_server::run(config).await;
            info!("server ran for {}", format_elapsed(started));
            result
        }
        Command::Doctor => doctor().await,
    }
}

async fn doctor() -> anyhow::Result<()> {
    let config = Config::load(ConfigOverrides::default())?;
    println!("state home:        {}", config.state_home.display());
    println!("database:          {}", config.db_path.display());
    println!("workspace default: {}", config.workspace_default.display());
    println!("outputs dir:       {}", config.outputs_dir.display());
    println!("bind address:      {}", config.bind_addr);
    println!("provider default:  {}", config.provider_default);
    println!("model default:     {}", config.model_default);
    println!(
        "capability ceiling: shell={} write={} browser={} dangerous={}",
        config.enable_shell, config.enable_write, config.enable_browser, config.allow_dangerous
    );

    let store = aidesk_core::store::Store::open(&config.db_path).await?;
    if let Some(token) = store.bootstrap().await? {
        println!("first run: created team `default`; api token: {token}");
    } else {
        println!("database reachable; users already present");
    }
    Ok(())
}
