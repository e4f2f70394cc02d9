use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    tern_config::{TernConfig, load_config},
    tern_gateway::start_gateway,
    tern_rpc::{
        BackendServices,
        http::{
            HttpAuthService, HttpConversationService, HttpMsgService, HttpPushService,
            HttpTransport, HttpUserService,
        },
        services::StaticDiscovery,
    },
};

#[derive(Parser)]
#[command(name = "tern", about = "Tern — realtime message gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file path (skips the standard discovery locations).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Serve {
        /// Override the configured bind address.
        #[arg(long)]
        bind: Option<String>,
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load and validate the configuration, then exit.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Commands::Serve { ref bind, port } => {
            let mut config = load(&cli)?;
            if let Some(bind) = bind {
                config.gateway.bind = bind.to_string();
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            let problems = config.validate();
            if !problems.is_empty() {
                anyhow::bail!("invalid configuration:\n  {}", problems.join("\n  "));
            }
            let services = wire_services(&config);
            start_gateway(config, services).await
        },
        Commands::Doctor => doctor(&cli),
    }
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

fn load(cli: &Cli) -> anyhow::Result<TernConfig> {
    match &cli.config {
        Some(path) => load_config(path),
        None => Ok(tern_config::discover_and_load()),
    }
}

/// Build HTTP clients for every backend out of the `[rpc]` section.
fn wire_services(config: &TernConfig) -> BackendServices {
    let timeout = Duration::from_secs(config.rpc.timeout_secs);
    let transport = |base: &str| HttpTransport::new(base, timeout);

    BackendServices {
        auth: Arc::new(HttpAuthService(transport(&config.rpc.auth_url))),
        user: Arc::new(HttpUserService(transport(&config.rpc.user_url))),
        msg: Arc::new(HttpMsgService(transport(&config.rpc.msg_url))),
        push: Arc::new(HttpPushService(transport(&config.rpc.push_url))),
        conversation: Arc::new(HttpConversationService(transport(
            &config.rpc.conversation_url,
        ))),
        discovery: Arc::new(StaticDiscovery::new(
            config.peers.addrs.clone(),
            config.peers.advertise_addr.clone(),
        )),
    }
}

fn doctor(cli: &Cli) -> anyhow::Result<()> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => tern_config::find_config_file(),
    };
    match &path {
        Some(path) => info!(path = %path.display(), "config file"),
        None => info!("no config file found, defaults apply"),
    }
    let config = load(cli)?;
    let problems = config.validate();
    if problems.is_empty() {
        println!("configuration ok");
        return Ok(());
    }
    for problem in &problems {
        println!("problem: {problem}");
    }
    anyhow::bail!("{} configuration problem(s)", problems.len())
}
