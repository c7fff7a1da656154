//! `autoagent` — headless CLI for the run orchestrator.
//!
//! The desktop shell talks to the same orchestrator through its own
//! wiring; this binary covers development and scripted use.

use std::io::Write as _;
use std::sync::Arc;

use aa_control::{retention, ControlPlaneClient};
use aa_domain::config::EnvConfig;
use aa_domain::run::RunInput;
use aa_mcp_client::McpManager;
use aa_providers::ProviderKind;
use aa_runtime::approval::{ApprovalCoordinator, ApprovalRequest, OperatorGate, StaticGate};
use aa_runtime::checkpoint::ResumeMode;
use aa_runtime::events::{EventSink, RunStatusEvent};
use aa_runtime::orchestrator::{Orchestrator, ProviderEndpoint};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "autoagent", about = "Operator-supervised autonomous coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKindArg {
    Openai,
    Anthropic,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResumeModeArg {
    Resume,
    Retry,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new run against a local project.
    Run {
        /// Project directory the agent may read and modify.
        #[arg(long)]
        project_dir: String,
        /// What the agent should accomplish.
        #[arg(long)]
        objective: String,
        /// Control-plane project id.
        #[arg(long, default_value = "default")]
        project_id: String,
        /// Provider wire protocol.
        #[arg(long, value_enum, default_value = "anthropic")]
        provider: ProviderKindArg,
        /// Provider id for circuit breaking and performance samples.
        #[arg(long, default_value = "anthropic")]
        provider_id: String,
        #[arg(long, default_value = "https://api.anthropic.com")]
        base_url: String,
        #[arg(long, default_value = "claude-sonnet-4-20250514")]
        model: String,
        /// Environment variable holding the API key.
        #[arg(long, default_value = "ANTHROPIC_API_KEY")]
        api_key_env: String,
        /// Approve every operator prompt automatically.
        #[arg(long)]
        yes: bool,
    },
    /// Re-enter a previously persisted run.
    Resume {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        project_dir: String,
        #[arg(long, value_enum, default_value = "resume")]
        mode: ResumeModeArg,
        #[arg(long, value_enum, default_value = "anthropic")]
        provider: ProviderKindArg,
        #[arg(long, default_value = "anthropic")]
        provider_id: String,
        #[arg(long, default_value = "https://api.anthropic.com")]
        base_url: String,
        #[arg(long, default_value = "ANTHROPIC_API_KEY")]
        api_key_env: String,
        #[arg(long)]
        yes: bool,
    },
}

/// Operator gate that asks on the terminal.
struct TerminalGate;

#[async_trait::async_trait]
impl OperatorGate for TerminalGate {
    async fn confirm(&self, request: &ApprovalRequest) -> bool {
        let prompt = match &request.tool_name {
            Some(tool) => format!("Approve {tool}? ({}) [y/N] ", request.reason),
            None => format!("{} [y/N] ", request.reason),
        };
        tokio::task::spawn_blocking(move || {
            print!("{prompt}");
            std::io::stdout().flush().ok();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).ok();
            matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
        })
        .await
        .unwrap_or(false)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AUTOAGENT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let env = EnvConfig::from_env();
    let client = Arc::new(ControlPlaneClient::new(&env.api_url));

    let settings = match client.get_settings().await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "settings unavailable, using defaults");
            Default::default()
        }
    };
    let _sweeper = retention::spawn_sweeper(Arc::clone(&client), settings.clone());

    match cli.command {
        Command::Run {
            project_dir,
            objective,
            project_id,
            provider,
            provider_id,
            base_url,
            model,
            api_key_env,
            yes,
        } => {
            let api_key = std::env::var(&api_key_env)
                .with_context(|| format!("API key env var {api_key_env} not set"))?;
            let gate: Arc<dyn OperatorGate> =
                if yes { Arc::new(StaticGate(true)) } else { Arc::new(TerminalGate) };
            let approvals = Arc::new(ApprovalCoordinator::new(Arc::clone(&client), gate));
            let orchestrator = Orchestrator::new(
                Arc::clone(&client),
                approvals,
                Arc::new(McpManager::empty()),
                settings,
            );

            let run = client
                .create_run(&project_id, &objective)
                .await
                .context("failed to create run")?;
            println!("run {} created", run.run_id);

            let input = RunInput {
                project_id,
                project_dir: std::fs::canonicalize(&project_dir)
                    .with_context(|| format!("project dir {project_dir} not found"))?
                    .to_string_lossy()
                    .into_owned(),
                objective,
                provider_id: provider_id.clone(),
                model,
                routing_mode: "balanced".into(),
                expected_fragments: vec![],
            };
            let endpoint = ProviderEndpoint {
                provider_id,
                kind: kind_of(provider),
                base_url,
                api_key,
            };

            let (sink, mut events) = EventSink::new();
            let printer = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    print_event(&event);
                }
            });

            let outcome = orchestrator
                .execute_run(input, endpoint, run, sink, None)
                .await?;
            printer.await.ok();

            println!(
                "\nrun {} finished: {:?} after {} turn(s)",
                outcome.run_id, outcome.status, outcome.turns
            );
            if !outcome.final_text.is_empty() {
                println!("{}", outcome.final_text);
            }
        }

        Command::Resume {
            run_id,
            project_dir,
            mode,
            provider,
            provider_id,
            base_url,
            api_key_env,
            yes,
        } => {
            let api_key = std::env::var(&api_key_env)
                .with_context(|| format!("API key env var {api_key_env} not set"))?;
            let state = client
                .get_execution_state(&run_id)
                .await?
                .context("no persisted state for this run")?;
            let run = client.get_run(&run_id).await.context("run not found")?;

            let gate: Arc<dyn OperatorGate> =
                if yes { Arc::new(StaticGate(true)) } else { Arc::new(TerminalGate) };
            let approvals = Arc::new(ApprovalCoordinator::new(Arc::clone(&client), gate));
            let orchestrator = Orchestrator::new(
                Arc::clone(&client),
                approvals,
                Arc::new(McpManager::empty()),
                settings,
            );

            let mut input = state.input.clone();
            input.project_dir = std::fs::canonicalize(&project_dir)
                .with_context(|| format!("project dir {project_dir} not found"))?
                .to_string_lossy()
                .into_owned();
            let endpoint = ProviderEndpoint {
                provider_id,
                kind: kind_of(provider),
                base_url,
                api_key,
            };
            let resume_mode = match mode {
                ResumeModeArg::Resume => ResumeMode::Resume,
                ResumeModeArg::Retry => ResumeMode::Retry,
            };

            let (sink, mut events) = EventSink::new();
            let printer = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    print_event(&event);
                }
            });

            let outcome = orchestrator
                .execute_run(input, endpoint, run, sink, Some((state, resume_mode)))
                .await?;
            printer.await.ok();
            println!(
                "\nrun {} finished: {:?} after {} turn(s)",
                outcome.run_id, outcome.status, outcome.turns
            );
        }
    }

    Ok(())
}

fn kind_of(arg: ProviderKindArg) -> ProviderKind {
    match arg {
        ProviderKindArg::Openai => ProviderKind::OpenAi,
        ProviderKindArg::Anthropic => ProviderKind::Anthropic,
    }
}

fn print_event(event: &RunStatusEvent) {
    match event {
        RunStatusEvent::Token { text } => {
            print!("{text}");
            std::io::stdout().flush().ok();
        }
        RunStatusEvent::State { state } => println!("[state] {state}"),
        RunStatusEvent::ToolCall { tool_name, .. } => println!("\n[tool] {tool_name}"),
        RunStatusEvent::ToolResult { tool_name, is_error, .. } => {
            println!("[tool done] {tool_name}{}", if *is_error { " (error)" } else { "" });
        }
        RunStatusEvent::AskUser { question, .. } => {
            println!("\n[question for you] {question} (answer via the dashboard)");
        }
        RunStatusEvent::Completed { summary } => println!("\n[completed] {summary}"),
        RunStatusEvent::FollowUps { suggestions } => {
            for s in suggestions {
                println!("[follow-up] {}: {}", s.title, s.objective_hint);
            }
        }
        RunStatusEvent::Error { message, state, .. } => println!("\n[{state}] {message}"),
    }
}
