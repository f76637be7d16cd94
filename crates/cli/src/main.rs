mod doctor_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::{error, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "dealgate", about = "Dealgate, deal platform gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the default locations.
    #[arg(long, global = true, env = "DEALGATE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate config and probe the store once.
    Doctor,
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

/// Route panics on any thread through tracing. Panics inside spawned tasks
/// stay contained to their task; this only makes sure they are recorded.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let thread = std::thread::current();
        error!(
            thread = thread.name().unwrap_or("unnamed"),
            %location,
            panic = %info.payload_as_str().unwrap_or("non-string payload"),
            "panic"
        );
    }));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    install_panic_hook();

    info!(version = env!("CARGO_PKG_VERSION"), "dealgate starting");

    let mut config = dealgate_config::load_from(cli.config.as_deref())?;

    match cli.command {
        Commands::Gateway { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            dealgate_gateway::server::start_gateway(&config).await
        },
        Commands::Doctor => doctor_commands::run_doctor(&config).await,
    }
}
