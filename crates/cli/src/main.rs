use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    lrcom_config::LrcomConfig,
    lrcom_gateway::turn,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "lrcom", about = "lrcom: anonymous messenger and call hub")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory to look for `lrcom.{toml,yaml,yml,json}` in.
    #[arg(long, global = true, env = "LRCOM_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub server.
    Serve {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the ICE configuration clients would receive right now.
    Turn,
    /// Print the effective configuration (secrets redacted).
    Config,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> LrcomConfig {
    if let Some(dir) = &cli.config_dir {
        lrcom_config::set_config_dir(dir.clone());
    }
    lrcom_config::discover_and_load()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    let mut config = load_config(&cli);

    match cli.command {
        Commands::Serve { bind, port } => {
            info!(version = env!("CARGO_PKG_VERSION"), "lrcom starting");
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            lrcom_gateway::start_gateway(config).await
        },
        Commands::Turn => {
            let ice = turn::ice_config(&config.turn, turn::unix_now());
            println!("{}", serde_json::to_string_pretty(&ice)?);
            Ok(())
        },
        Commands::Config => {
            println!("{config:#?}");
            Ok(())
        },
    }
}
