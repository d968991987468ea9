//! resumux node binary.

use std::{net::SocketAddr, process::ExitCode};

use bytes::Bytes;
use clap::{Parser, Subcommand};
use resumux_core::{Role, env::SystemEnv};
use resumux_node::{
    Client, NodeError, Request, Server, TcpTransport, builtin_routes,
    config::{ModelArg, SessionArgs},
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "resumux-node", version, about = "Serve or issue resumux requests over TCP")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept sessions and serve the built-in routes
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:7878")]
        addr: SocketAddr,
    },
    /// Issue one request and log what comes back
    Request {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:7878")]
        addr: SocketAddr,

        /// Route to request
        #[arg(long)]
        route: String,

        /// Interaction model
        #[arg(long, value_enum, default_value_t = ModelArg::Rr)]
        model: ModelArg,

        /// Request data; repeat to send more channel items
        #[arg(long)]
        data: Vec<String>,

        /// Initial demand for stream and channel requests
        #[arg(long, default_value_t = 16)]
        initial_n: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "resumux-node failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<(), NodeError> {
    match cli.command {
        Command::Serve { addr } => {
            let transport = TcpTransport::bind(addr).await?;
            let routes = builtin_routes()?;
            let server = Server::new(transport, SystemEnv, cli.session.session_config(Role::Server), routes);
            server.run().await
        },
        Command::Request { addr, route, model, data, initial_n } => {
            let client = Client::new(TcpTransport::client(), SystemEnv, cli.session.session_config(Role::Client), addr);
            let request = Request {
                route,
                model: model.into(),
                data: data.into_iter().map(Bytes::from).collect(),
                initial_n,
            };
            let outcome = client.request(&request).await?;
            tracing::info!(
                stream_id = outcome.stream_id,
                items = outcome.items.len(),
                completed = outcome.completed,
                reconnections = outcome.reconnections,
                error = ?outcome.error,
                "request finished"
            );
            Ok(())
        },
    }
}
