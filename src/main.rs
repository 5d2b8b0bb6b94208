//! GIVE server
//!
//! Runs the GIVE web service and its operational commands.

use axum::Router;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use color_eyre::eyre::eyre;
use give::{
    config::{Config, LoggingConfig},
    database::ConnectionFactory,
    error,
    server::GiveServer,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    error::install_error_handlers()?;

    // Load configuration from file and/or environment variables
    let config = Config::load()
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;
    config.validate().map_err(|e| eyre!("Invalid configuration: {}", e))?;

    init_logging(&config.logging);

    let app = Command::new("give")
        .version(env!("CARGO_PKG_VERSION"))
        .about("GIVE genome browser server")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("serve").about("Run the HTTP server").arg(
                Arg::new("port")
                    .long("port")
                    .help("Port to listen on (overrides configuration)")
                    .value_parser(value_parser!(u16)),
            ),
        )
        .subcommand(
            Command::new("check-db")
                .about("Open and close a session on a reference database")
                .arg(Arg::new("schema").long("schema").help("Schema to select (default: configured)"))
                .arg(
                    Arg::new("write")
                        .long("write")
                        .help("Use the writer credentials")
                        .action(ArgAction::SetTrue),
                ),
        );

    match app.get_matches().subcommand() {
        Some(("serve", args)) => serve(config, args).await?,
        Some(("check-db", args)) => check_db(&config, args).await?,
        Some((name, _)) => return Err(eyre!("Unknown command: {}", name)),
        None => return Err(eyre!("No command given")),
    }

    info!("Execution completed successfully");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let mut env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    if let Some(dep_filter) = &config.dependency_filter {
        let filter_string = format!("{},{}", env_filter, dep_filter);
        env_filter = EnvFilter::try_new(&filter_string).unwrap_or(env_filter);
    }

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.format == "json" {
        registry.with(fmt::layer().json().with_current_span(false)).init();
    } else {
        let format = fmt::format().with_thread_ids(true).with_target(false);
        registry.with(fmt::layer().event_format(format)).init();
    }
}

async fn serve(mut config: Config, args: &ArgMatches) -> color_eyre::Result<()> {
    if let Some(port) = args.get_one::<u16>("port") {
        config.server.port = *port;
    }

    let connections = Arc::new(ConnectionFactory::new(&config.database)?);
    let server = GiveServer::new(config.server.clone(), config.error_policy());

    let shutdown_handle = server.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        shutdown_handle.shutdown().await;
    });

    server.run(connections, Router::new()).await?;
    Ok(())
}

async fn check_db(config: &Config, args: &ArgMatches) -> color_eyre::Result<()> {
    let connections = ConnectionFactory::new(&config.database)?;
    let schema = args
        .get_one::<String>("schema")
        .map(String::as_str)
        .unwrap_or(connections.default_schema().as_str());

    let conn = if args.get_flag("write") {
        connections.connect_writer(schema).await?
    } else {
        connections.connect_reader(schema).await?
    };

    let info = connections.connection_info(conn.mode(), conn.schema());
    conn.close().await?;
    info!("Database check succeeded: {}", info);
    Ok(())
}
