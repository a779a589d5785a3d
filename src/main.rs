//! wsrelay - A Minimal WebSocket Relay Server
//!
//! This is the main entry point for the wsrelay server.
//! It reads the configuration, binds the listener, and runs until Ctrl+C.

use anyhow::{bail, Context};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wsrelay::router::RoutingPolicy;
use wsrelay::server::{parse_port, RelayServer, ServerConfig, MAX_OUTBOUND_CAPACITY};

/// Command-line options
#[derive(Debug)]
struct Options {
    /// Server settings (environment first, then flags)
    server: ServerConfig,
    /// Relay policy
    policy: RoutingPolicy,
}

impl Options {
    /// Parse options from command-line arguments over `base`
    fn parse<I>(base: ServerConfig, args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Options {
            server: base,
            policy: RoutingPolicy::default(),
        };
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .with_context(|| format!("{flag} requires a value"))
            };

            match arg.as_str() {
                "--host" | "-h" => options.server.host = value("--host")?,
                "--port" | "-p" => {
                    let port = value("--port")?;
                    options.server.port = match parse_port(&port) {
                        Some(port) => port,
                        None => bail!("invalid port number '{port}'"),
                    };
                }
                "--policy" => options.policy = value("--policy")?.parse()?,
                "--greeting" => options.server.greeting = Some(value("--greeting")?),
                "--queue" => {
                    let queue = value("--queue")?;
                    options.server.outbound_capacity = match queue.parse() {
                        Ok(n) if (1..=MAX_OUTBOUND_CAPACITY).contains(&n) => n,
                        _ => bail!(
                            "invalid queue size '{queue}' (expected 1 to {MAX_OUTBOUND_CAPACITY})"
                        ),
                    };
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("wsrelay version {}", wsrelay::VERSION);
                    std::process::exit(0);
                }
                other => bail!("unknown argument: {other}"),
            }
        }

        Ok(options)
    }
}

fn print_help() {
    println!(
        r#"
wsrelay - A Minimal WebSocket Relay Server

USAGE:
    wsrelay [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Host to bind to (default: 127.0.0.1, env: WSRELAY_HOST)
    -p, --port <PORT>        Port to listen on (default: 3002, env: WSRELAY_PORT or PORT)
        --policy <POLICY>    echo | broadcast | broadcast-others (default: echo)
        --greeting <TEXT>    Message sent to every client when it connects
        --queue <N>          Outbound messages buffered per client (default: 64)
    -v, --version            Print version information
        --help               Print this help message

EXAMPLES:
    wsrelay                                  # Echo server on 127.0.0.1:3002
    wsrelay --policy broadcast-others        # Chat-style relay
    wsrelay --host 0.0.0.0 --port 9001       # Listen on all interfaces

LOGGING:
    RUST_LOG=debug wsrelay                   # Verbose connection lifecycle
"#
    );
}

fn print_banner(options: &Options) {
    println!(
        r#"
wsrelay v{} - Minimal WebSocket Relay Server
──────────────────────────────────────────────────────────────
Listening on ws://{}
Policy: {}

Use Ctrl+C to shutdown gracefully.
"#,
        wsrelay::VERSION,
        options.server.bind_address(),
        options.policy
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up logging (RUST_LOG overrides the default level)
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Environment first, then command-line flags
    let base = ServerConfig::from_env()?;
    let options =
        Options::parse(base, std::env::args().skip(1)).context("run with --help for usage")?;

    let server = RelayServer::bind(options.server.clone(), options.policy.clone())
        .await
        .context("failed to start server")?;

    print_banner(&options);

    // Set up graceful shutdown
    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    server.run_until(shutdown).await?;
    Ok(())
}
