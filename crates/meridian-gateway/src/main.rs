//! Meridian binary: one-shot chat, agent listing, and server mode.
//!
//! Exit codes: 0 success, 1 configuration/provider failure, 2 invalid
//! argument.

use std::io::Write;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

mod app;
mod auth;
mod http;
mod wiring;

use meridian_agent::content::{encode_image, ContentBlock};
use meridian_agent::StreamEvent;
use meridian_core::config::Config;

#[derive(Parser)]
#[command(
    name = "meridian",
    version,
    about = "Multi-channel conversational agent runtime"
)]
struct Cli {
    /// Message for one-shot mode. Omit with --serve to run the server.
    message: Option<String>,

    /// Path to meridian.yaml (default: searched).
    #[arg(long)]
    config: Option<String>,

    /// Agent name to talk to (default: the routing default).
    #[arg(long)]
    agent: Option<String>,

    /// Run the HTTP gateway server.
    #[arg(long)]
    serve: bool,

    /// List configured agents and exit.
    #[arg(long)]
    list_agents: bool,

    /// Continue the most recently saved session.
    #[arg(long = "continue")]
    continue_session: bool,

    /// Attach an image (repeatable).
    #[arg(long)]
    image: Vec<String>,

    /// Disable streaming output in one-shot mode.
    #[arg(long)]
    no_stream: bool,

    // Per-tool-group disables.
    #[arg(long)]
    no_terminal: bool,
    #[arg(long)]
    no_web: bool,
    #[arg(long)]
    no_skills: bool,
    #[arg(long)]
    no_cron: bool,
    #[arg(long)]
    no_registry: bool,

    /// Bind address override (server mode).
    #[arg(long)]
    bind: Option<String>,

    /// Port override (server mode).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meridian=info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    apply_cli_overrides(&mut config, &cli);

    if cli.list_agents {
        return list_agents(&config);
    }

    if cli.serve {
        return serve(config).await;
    }

    let Some(message) = cli.message.clone() else {
        eprintln!("No message given. Pass a message for one-shot mode or --serve for server mode.");
        return ExitCode::from(2);
    };

    one_shot(config, &cli, &message).await
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if cli.no_terminal {
        config.enable_terminal = false;
    }
    if cli.no_web {
        config.enable_web = false;
    }
    if cli.no_skills {
        config.enable_skills = false;
    }
    if cli.no_cron {
        config.enable_cron = false;
    }
    if cli.no_registry {
        config.enable_registry = false;
    }
    if let Some(bind) = &cli.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
}

fn list_agents(config: &Config) -> ExitCode {
    if config.has_multi_agent() {
        let mut names: Vec<&String> = config.agents.keys().collect();
        names.sort();
        println!("Configured agents:");
        for name in names {
            println!("  {name}");
        }
    } else {
        println!("Configured agents:\n  default");
    }
    ExitCode::SUCCESS
}

async fn one_shot(config: Config, cli: &Cli, message: &str) -> ExitCode {
    let runtime = match wiring::build_runtime(config, &Default::default()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to start: {e}");
            return ExitCode::from(1);
        }
    };

    let mut images: Vec<ContentBlock> = Vec::new();
    for path in &cli.image {
        match encode_image(path) {
            Ok(block) => images.push(block),
            Err(e) => {
                eprintln!("Cannot read image '{path}': {e}");
                return ExitCode::from(2);
            }
        }
    }

    let agent_name = cli
        .agent
        .clone()
        .unwrap_or_else(|| runtime.router.default_name().to_string());
    let instance = match runtime.pool.get(&agent_name, "").await {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };
    let mut agent = instance.lock().await;

    if cli.continue_session {
        match runtime.memory.lock().await.load_conversation(None) {
            Ok(history) if !history.is_empty() => {
                info!(messages = history.len(), "continuing previous session");
                agent.set_history(history);
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to load previous session"),
        }
    }

    let result = if cli.no_stream {
        match agent.chat(message, &images).await {
            Ok(reply) => {
                println!("{reply}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    } else {
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        let print_task = async {
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Text { text } => {
                        print!("{text}");
                        let _ = std::io::stdout().flush();
                    }
                    StreamEvent::ToolCalls { tool_calls } => {
                        for call in tool_calls {
                            eprintln!("[tool] {}", call.name);
                        }
                    }
                    StreamEvent::Done { .. } => {}
                }
            }
            println!();
        };
        let (chat_result, ()) = tokio::join!(agent.chat_stream(message, &images, tx), print_task);
        chat_result
    };

    if let Err(e) = result {
        eprintln!("Provider error: {e}");
        return ExitCode::from(1);
    }

    if let Err(e) = runtime.memory.lock().await.save_conversation(agent.history()) {
        error!(error = %e, "failed to save conversation");
    }
    ExitCode::SUCCESS
}

async fn serve(config: Config) -> ExitCode {
    let bind = config.bind.clone();
    let port = config.port;

    let runtime = match wiring::build_runtime(config, &Default::default()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to start: {e}");
            return ExitCode::from(1);
        }
    };

    let auth_token = auth::resolve_token(&runtime.config.gateway_token, &bind);

    // Scheduler loop with a stop flag observed between ticks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Some(scheduler) = runtime.scheduler.clone() {
        tokio::spawn(scheduler.run(shutdown_rx));
    }

    let state = Arc::new(app::AppState {
        runtime,
        auth_token,
    });
    let router = app::build_router(state);

    let addr: SocketAddr = match format!("{bind}:{port}").parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Invalid bind address {bind}:{port}: {e}");
            return ExitCode::from(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Cannot bind {addr}: {e}");
            return ExitCode::from(1);
        }
    };
    info!("meridian gateway listening on {addr}");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await;

    let _ = shutdown_tx.send(true);

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {e}");
            ExitCode::from(1)
        }
    }
}
