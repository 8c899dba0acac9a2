use std::{path::Path, sync::Arc, time::Duration};

use cidgate::{
    AdmissionController, GatewayServer, GracefulShutdown, PinningServiceClient,
    RateLimiterRegistry,
    adapters::{
        DrainPolicy, health_option, request_timing_option, status_option, upstream_option,
        version_option, with_admission,
    },
    config::{
        GatewayConfig, GatewayMode, ServerConfigValidator,
        loader::{load_config, render_default_config},
    },
    core::{ServeContext, ServeOption, make_handler},
    ports::HttpServer,
    tracing_setup,
    utils::ListenAddr,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Check a configuration file without serving
    Validate {
        /// File to check
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Write a starter configuration file
    Init {
        /// Where to write it
        #[clap(short, long, default_value = "config.toml")]
        config: String,
        /// Only serve content somebody subscribed to
        #[clap(long)]
        dedicated_gateway: bool,
        /// Base URL of the pinning service
        #[clap(long, default_value = "http://127.0.0.1:3000")]
        pinning_service: String,
        /// API key sent with every policy check
        #[clap(long, default_value = "")]
        api_key: String,
    },
    /// Run the gateway (default)
    Serve {
        /// Configuration file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init {
            config,
            dedicated_gateway,
            pinning_service,
            api_key,
        }) => init_config_command(&config, &pinning_service, &api_key, dedicated_gateway).await,
        Some(Commands::Serve { config }) => serve_command(&config).await,
        None => serve_command(&args.config).await,
    }
}

async fn serve_command(config_path: &str) -> Result<()> {
    let config: GatewayConfig = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    ServerConfigValidator::validate(&config).map_err(|e| eyre!("{e}"))?;
    let config = Arc::new(config);

    let mode = GatewayMode::from_config(&config.pinning_service);
    tracing::info!(%mode, config = config_path, "Starting cidgate");

    let limiters = Arc::new(
        RateLimiterRegistry::from_settings(&config.rate_limit)
            .context("Failed to build rate limiter registry")?,
    );
    let housekeeping = tokio::spawn(limiters.clone().run_housekeeping(Duration::from_secs(
        config.rate_limit.housekeeping_interval_secs,
    )));

    let policy = Arc::new(
        PinningServiceClient::new(&config.pinning_service)
            .context("Failed to create pinning service client")?,
    );
    let controller = AdmissionController::new(mode, limiters.clone(), policy)
        .with_trust_forwarded_for(config.rate_limit.trust_forwarded_for);

    let listen_addr: ListenAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let server = GatewayServer::bind(&listen_addr, DrainPolicy::from(&config.shutdown))
        .await
        .context("Failed to bind listen address")?;

    let ctx = ServeContext::new(config.clone(), server.local_addr());
    let options: Vec<ServeOption> = vec![
        health_option(),
        version_option(),
        status_option(mode, limiters),
        request_timing_option(),
        upstream_option(),
    ];
    let handler = make_handler(&ctx, options).context("Failed to compose request handler")?;
    let router = with_admission(handler, controller);

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!(error = %e, "Signal handler failed");
        }
    });

    let multiaddr = server.multiaddr();
    tracing::info!(%multiaddr, "listening on {multiaddr}");
    println!("cidgate listening on {multiaddr} ({mode} mode)");

    let result = server
        .serve(router, graceful_shutdown.shutdown_token())
        .await;
    housekeeping.abort();

    result.context("Server error")?;
    Ok(())
}

/// Parse and validate `config_path`, print a summary, exit non-zero on failure.
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Checking {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ {config_path} does not exist");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Parsed");
            config
        }
        Err(e) => {
            eprintln!("❌ Could not parse {config_path}:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Valid");
            println!();
            println!("📋 Effective settings:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!(
                "   • Mode: {}",
                GatewayMode::from_config(&config.pinning_service)
            );
            println!("   • Pinning Service: {}", config.pinning_service.endpoint);
            println!(
                "   • Client Limit: {} per {}",
                config.rate_limit.client.burst, config.rate_limit.client.period
            );
            println!(
                "   • CID Limit: {} per {}",
                config.rate_limit.resource.burst, config.rate_limit.resource.period
            );
            println!(
                "   • Upstream: {}",
                config.upstream.as_deref().unwrap_or("(none)")
            );
            println!();
            println!("🎉 Ready to serve");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ {config_path} is not usable:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • pinning_service.endpoint and upstream need an http:// or https:// URL");
            println!("   • Use a TCP multiaddr such as /ip4/0.0.0.0/tcp/8080");
            println!("   • Rate limit periods are humantime strings such as 30s, 1m or 1h");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(
    config_path: &str,
    pinning_service: &str,
    api_key: &str,
    dedicated_gateway: bool,
) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ {config_path} already exists, not overwriting");
        std::process::exit(1);
    }

    let rendered = render_default_config(pinning_service, api_key, dedicated_gateway);
    tokio::fs::write(path, rendered)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'cidgate serve --config {config_path}' to start the server");
    Ok(())
}
