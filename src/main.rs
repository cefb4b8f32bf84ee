#![forbid(unsafe_code)]

//! `agent-relay`: drive an agent inside a tmux session, or call tools on a
//! stdio JSON-RPC server and hand the results to an analysis CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::agent_cli::AgentCli;
use agent_relay::config::{GlobalConfig, WaitMode};
use agent_relay::dispatch::wait::{FixedDelay, WaitPolicy};
use agent_relay::dispatch::{Command, CommandDispatcher, DispatchTarget};
use agent_relay::mux::tmux::TmuxMultiplexer;
use agent_relay::mux::Multiplexer;
use agent_relay::report;
use agent_relay::rpc::client::{RpcClient, ToolRequest};
use agent_relay::rpc::message::render_outcome;
use agent_relay::session::locator::{timestamped_name, SettleDelays};
use agent_relay::{AppError, Result};

const DEFAULT_ANALYSIS_PROMPT: &str = "Analyze the following data. Identify errors and \
anomalies, rank them by severity, and give specific recommendations for each.";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Terminal session and tool-call relay", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Override the target session name.
    #[arg(long, global = true)]
    session: Option<String>,

    /// Override the terminal device whose session is preferred.
    #[arg(long, global = true)]
    tty: Option<String>,

    /// Use a fixed wait of this many seconds after each command.
    #[arg(long, global = true)]
    wait_seconds: Option<u64>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Send commands to the session and save each captured response.
    Send {
        /// Commands, sent one after another.
        #[arg(required = true)]
        commands: Vec<String>,

        /// Create a fresh session running the bootstrap command.
        #[arg(long)]
        new: bool,

        /// Wait the long fixed delay, for a single command that does real work.
        #[arg(long)]
        long: bool,
    },

    /// Call one tool and print its text.
    Call {
        /// Tool name.
        tool: String,

        /// Tool arguments as a JSON object.
        #[arg(long)]
        args: Option<String>,
    },

    /// Call several tools and have the analysis CLI review the results.
    Analyze {
        /// Tool to call, as `NAME` or `NAME=JSON`. Repeatable.
        #[arg(long = "tool", required = true)]
        tools: Vec<ToolRequest>,

        /// Instruction placed before the collected data.
        #[arg(long)]
        prompt: Option<String>,

        /// Report file.
        #[arg(long, default_value = "analysis_output.txt")]
        output: PathBuf,

        /// Also save the prompt and collected data as markdown here.
        #[arg(long)]
        data_file: Option<PathBuf>,
    },

    /// List live sessions and their terminals.
    Sessions,

    /// Clear a session's scrollback.
    Clear {
        /// Session name.
        name: String,
    },

    /// Destroy a session.
    Kill {
        /// Session name.
        name: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::from_toml_str("")?,
    };

    if let Some(name) = args.session {
        config.session.name = name;
    }
    if let Some(tty) = args.tty {
        config.session.target_tty = Some(tty);
    }
    if let Some(seconds) = args.wait_seconds {
        config.dispatch.wait = WaitMode::Fixed;
        config.dispatch.delay_seconds = seconds;
    }

    let mux: Arc<dyn Multiplexer> =
        Arc::new(TmuxMultiplexer::new().with_socket(config.session.socket.clone()));

    match args.action {
        Action::Send {
            commands,
            new,
            long,
        } => send(&config, mux, &commands, new, long).await,
        Action::Call { tool, args } => {
            config.load_credentials().await?;
            let arguments = match args {
                Some(raw) => serde_json::from_str(&raw)?,
                None => serde_json::Value::Null,
            };
            let rpc = config.require_rpc()?;
            let client = RpcClient::from_config(rpc, config.rpc_environment());
            let result = client
                .call_tool(&tool, arguments, Duration::from_secs(rpc.timeout_seconds))
                .await?;
            println!("{}", result.extract_text());
            result.into_success().map(|_| ())
        }
        Action::Analyze {
            tools,
            prompt,
            output,
            data_file,
        } => {
            config.load_credentials().await?;
            analyze(
                &config,
                &tools,
                prompt.as_deref(),
                &output,
                data_file.as_deref(),
            )
            .await
        }
        Action::Sessions => {
            for session in mux.list_sessions().await? {
                println!(
                    "{}\t{}",
                    session.name,
                    session.tty.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Action::Clear { name } => {
            mux.clear_history(&name).await?;
            info!(session = %name, "scrollback cleared");
            Ok(())
        }
        Action::Kill { name } => {
            mux.kill_session(&name).await?;
            info!(session = %name, "session destroyed");
            Ok(())
        }
    }
}

async fn send(
    config: &GlobalConfig,
    mux: Arc<dyn Multiplexer>,
    commands: &[String],
    new: bool,
    long: bool,
) -> Result<()> {
    let commands = commands
        .iter()
        .map(Command::new)
        .collect::<Result<Vec<_>>>()?;

    let target = if new {
        DispatchTarget::Create {
            name: timestamped_name(&config.session.create_prefix),
            bootstrap: config.session.bootstrap_command.clone(),
            settle: SettleDelays {
                after_create: Duration::from_millis(config.session.create_settle_millis),
                after_bootstrap: Duration::from_millis(config.session.bootstrap_settle_millis),
            },
        }
    } else {
        DispatchTarget::Existing {
            name: config.session.name.clone(),
            tty: config.session.target_tty.clone(),
        }
    };

    let wait: Box<dyn WaitPolicy> = if long {
        Box::new(FixedDelay::long())
    } else {
        config.dispatch.wait_policy()
    };
    let dispatcher = CommandDispatcher::new(mux, config.session.scrollback_lines, wait);
    let output_dir = &config.dispatch.output_dir;

    let session = dispatcher
        .run_with(&target, &commands, |response| {
            let path = report::write_response(output_dir, response)?;
            println!("── {} ({})", response.command, response.completeness);
            println!("{}", response.text());
            println!("── saved to {}", path.display());
            Ok(())
        })
        .await?;

    info!(session = %session.name, commands = commands.len(), "all commands dispatched");
    Ok(())
}

async fn analyze(
    config: &GlobalConfig,
    tools: &[ToolRequest],
    prompt: Option<&str>,
    output: &Path,
    data_file: Option<&Path>,
) -> Result<()> {
    let rpc = config.require_rpc()?;
    let client = RpcClient::from_config(rpc, config.rpc_environment());
    let timeout = Duration::from_secs(rpc.timeout_seconds);

    let mut sections = Vec::with_capacity(tools.len());
    for request in tools {
        let outcome = client
            .call_tool(&request.name, request.arguments.clone(), timeout)
            .await;
        if let Err(err) = &outcome {
            warn!(tool = %request.name, %err, "tool call failed; including error in data");
        }
        sections.push((request.name.as_str(), render_outcome(&outcome)));
    }

    let data = report::combine_sections(
        sections
            .iter()
            .map(|(name, text)| (*name, text.as_str())),
    );

    let prompt = prompt.unwrap_or(DEFAULT_ANALYSIS_PROMPT);
    if let Some(path) = data_file {
        report::write_data_file(path, prompt, &data)?;
    }

    let agent = AgentCli::from_config(&config.agent);
    let analysis = agent.analyze(prompt, &data).await?;

    println!("{analysis}");
    report::write_analysis_report(output, &analysis, &data)
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
