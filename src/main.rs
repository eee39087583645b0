#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # exec-relay
//!
//! Run a command inside a Kubernetes container from the terminal, or list the
//! containers an exec can target.
//!
//! ## Subcommands
//!
//! - `exec-relay exec -n NS -p POD -c CONTAINER [--stdin] [--tty] -- CMD...`
//!   relays terminal stdin/stdout through the exec WebSocket and exits with
//!   the remote exit code when the cluster reports one
//! - `exec-relay containers -n NS [-p POD]` prints container descriptors as JSON
//!
//! Logs go to stderr so stdout carries only remote output.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Bytes;
use tracing::{debug, error, info, warn};

use exec_relay::config::Config;
use exec_relay::containers::ContainerLister;
use exec_relay::{
    Completion, ExecTarget, OutputSink, SessionDescriptor, SessionHandle, SinkError, Sinks,
    StreamFlags,
};

/// Kubernetes exec relay.
#[derive(Parser)]
#[command(name = "exec-relay", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command in a container.
    Exec {
        #[arg(short, long, default_value = "default")]
        namespace: String,
        #[arg(short, long)]
        pod: String,
        #[arg(short, long)]
        container: String,
        /// Forward terminal stdin to the command.
        #[arg(long)]
        stdin: bool,
        /// Ask for a TTY on the remote side.
        #[arg(long)]
        tty: bool,
        #[arg(long)]
        no_stdout: bool,
        #[arg(long)]
        no_stderr: bool,
        /// Command and arguments.
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },
    /// List containers of a pod, or of every pod in the namespace.
    Containers {
        #[arg(short, long, default_value = "default")]
        namespace: String,
        #[arg(short, long)]
        pod: Option<String>,
    },
}

/// Writes remote output to the process stdout.
struct StdoutSink {
    out: Mutex<tokio::io::Stdout>,
}

#[async_trait]
impl OutputSink for StdoutSink {
    async fn deliver(&self, chunk: Bytes) -> Result<(), SinkError> {
        let mut out = self.out.lock().await;
        out.write_all(&chunk)
            .await
            .map_err(|e| SinkError::Rejected(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| SinkError::Rejected(e.to_string()))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("exec-relay: {e}");
            std::process::exit(2);
        }
    };

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Exec {
            namespace,
            pod,
            container,
            stdin,
            tty,
            no_stdout,
            no_stderr,
            argv,
        } => {
            let descriptor = SessionDescriptor::new(
                ExecTarget::new(namespace, pod, container),
                argv,
                StreamFlags {
                    stdin,
                    stdout: !no_stdout,
                    stderr: !no_stderr,
                    tty,
                },
            );
            run_exec(&config, descriptor).await
        }
        Commands::Containers { namespace, pod } => {
            run_containers(&config, &namespace, pod.as_deref()).await
        }
    };
    std::process::exit(code);
}

async fn run_exec(config: &Config, descriptor: SessionDescriptor) -> i32 {
    let relay = match config.build_relay() {
        Ok(relay) => relay,
        Err(e) => {
            error!("{e}");
            return 2;
        }
    };

    let (done_tx, mut done_rx) = mpsc::channel::<Completion>(1);
    let sinks = Sinks::new(
        StdoutSink {
            out: Mutex::new(tokio::io::stdout()),
        },
        done_tx,
    );

    let mut handle = match relay.exec(descriptor, sinks).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };
    if let Some(input) = handle.take_input() {
        tokio::spawn(pump_stdin(input));
    }

    let completion = tokio::select! {
        done = done_rx.recv() => done,
        _ = tokio::signal::ctrl_c() => {
            info!(session = %handle.id(), "Interrupted, cancelling session");
            handle.cancel();
            done_rx.recv().await
        }
    };
    wait_released(&handle).await;

    match completion {
        Some(c) => {
            debug!(success = c.success, reason = %c.reason, exit_code = ?c.exit_code, "Exec: done");
            c.exit_code.unwrap_or(i32::from(!c.success))
        }
        None => {
            warn!("Session ended without reporting completion");
            1
        }
    }
}

async fn wait_released(handle: &SessionHandle) {
    if tokio::time::timeout(std::time::Duration::from_secs(5), handle.closed())
        .await
        .is_err()
    {
        debug!(session = %handle.id(), "Connection release still pending at exit");
    }
}

/// Terminal stdin into the session. EOF drops the sender, which closes the
/// session's input gracefully.
async fn pump_stdin(input: mpsc::Sender<Bytes>) {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 8192];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if input.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("stdin read failed: {e}");
                break;
            }
        }
    }
    debug!("stdin closed");
}

async fn run_containers(config: &Config, namespace: &str, pod: Option<&str>) -> i32 {
    match list_containers(config, namespace, pod).await {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            error!("{e}");
            1
        }
    }
}

async fn list_containers(
    config: &Config,
    namespace: &str,
    pod: Option<&str>,
) -> Result<String, Box<dyn std::error::Error>> {
    let lister = ContainerLister::new(config.cluster_endpoint()?, &config.credentials()?)?;
    let containers = lister.list_containers(namespace, pod).await?;
    Ok(serde_json::to_string_pretty(&containers)?)
}
