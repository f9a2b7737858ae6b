use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use micro_proxy::config::{DEFAULT_AGENT, DEFAULT_BUFFER_SIZE, DEFAULT_HOST, DEFAULT_MAX_CLIENTS, DEFAULT_PORT, ProxyConfig};
use micro_proxy::server::ProxyServer;

/// A forward HTTP proxy: plain requests are relayed verbatim, `CONNECT` opens a tunnel.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Hostname to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    hostname: String,

    /// Port to bind to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Listen backlog and maximum number of clients served at once
    #[arg(short = 'c', long, default_value_t = DEFAULT_MAX_CLIENTS)]
    max_clients: usize,

    /// Bytes read per call when framing messages and relaying tunnels
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Value of the `ProxyServer-agent` header in CONNECT acknowledgements
    #[arg(long, default_value = DEFAULT_AGENT)]
    agent: String,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl From<Cli> for ProxyConfig {
    fn from(cli: Cli) -> Self {
        Self { host: cli.hostname, port: cli.port, max_clients: cli.max_clients, buffer_size: cli.buffer_size, agent: cli.agent }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return;
    }

    let server = match ProxyServer::builder().config(cli.into()).build() {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "invalid configuration");
            return;
        }
    };

    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(cause = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("ctrl-c received, shutting down");
        })
        .await;
}
