use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use promptwire::chat::Conversation;
use promptwire::config::Config;
use promptwire::request::{Action, RequestPayload, SamplingParams};
use promptwire::session::{Connector, Outcome, SessionEvent, SessionHandle, SessionSlot};
use promptwire::template::{PromptInput, Template};

#[derive(Parser)]
#[command(name = "promptwire", about = "Stream model responses over a websocket gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one prompt and stream the response.
    Send(SendArgs),
    /// Multi-turn chat on stdin.
    Chat(ChatArgs),
    /// Verify an identity token and print the resulting access policy.
    Authorize {
        /// Identity token (JWT).
        token: String,
        /// Resource the policy applies to.
        #[arg(long, default_value = "*")]
        resource: String,
    },
    /// List configured models.
    Models,
}

#[derive(Args)]
struct Sampling {
    #[arg(long)]
    temperature: Option<f64>,
    #[arg(long)]
    top_k: Option<u32>,
    #[arg(long)]
    top_p: Option<f64>,
    #[arg(long)]
    max_tokens: Option<u32>,
}

impl Sampling {
    fn over(&self, base: SamplingParams) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature.unwrap_or(base.temperature),
            top_k: self.top_k.unwrap_or(base.top_k),
            top_p: self.top_p.unwrap_or(base.top_p),
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
        }
    }
}

#[derive(Args)]
struct SendArgs {
    /// Prompt text; read from stdin when omitted.
    prompt: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    system: Option<String>,
    /// Template JSON file; the prompt replaces its placeholder.
    #[arg(long)]
    template: Option<PathBuf>,
    /// Object-storage key of an uploaded image (repeatable).
    #[arg(long = "image")]
    images: Vec<String>,
    /// Enable reasoning mode with this token budget.
    #[arg(long)]
    reasoning_budget: Option<u32>,
    #[command(flatten)]
    sampling: Sampling,
}

#[derive(Args)]
struct ChatArgs {
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    system: Option<String>,
    #[command(flatten)]
    sampling: Sampling,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            match e.downcast_ref::<promptwire::error::PromptwireError>() {
                Some(pe) => eprintln!("error: {}", pe.user_message()),
                None => eprintln!("error: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load()?;

    match cli.command {
        Command::Send(args) => send(&config, args).await,
        Command::Chat(args) => chat(&config, args).await,
        Command::Authorize { token, resource } => {
            let settings = config
                .authorizer
                .as_ref()
                .context("set PROMPTWIRE_AUTH_ISSUER, PROMPTWIRE_AUTH_AUDIENCE and a key")?;
            let query = HashMap::from([("Authorization".to_string(), token)]);
            let policy = settings.build()?.authorize(&query, &resource);
            println!("{}", serde_json::to_string_pretty(&policy)?);
            Ok(if policy.is_allowed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Models => {
            for m in config.models.list() {
                let mut caps = Vec::new();
                if m.vision {
                    caps.push("vision");
                }
                if m.reasoning {
                    caps.push("reasoning");
                }
                println!("{:<45} {:<18} {}", m.model_id, caps.join(","), m.description);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn connector(config: &Config) -> anyhow::Result<Connector<promptwire::config::AnyToken>> {
    let endpoint = config
        .endpoint
        .clone()
        .context("PROMPTWIRE_WEBSOCKET_URL is not set")?;
    Ok(Connector::new(endpoint, config.token_provider()?)?
        .with_catalog(config.models.clone())
        .with_connect_timeout(config.connect_timeout))
}

async fn send(config: &Config, args: SendArgs) -> anyhow::Result<ExitCode> {
    let connector = connector(config)?;

    let raw = match args.prompt {
        Some(p) => p,
        None => {
            let mut buf = String::new();
            let mut stdin = BufReader::new(tokio::io::stdin());
            while stdin.read_line(&mut buf).await? > 0 {}
            buf
        }
    };

    let template = match &args.template {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading template {}", path.display()))?;
            Some(Template::from_json(&text)?)
        }
        None => None,
    };

    let mut input = match template.clone() {
        Some(t) => PromptInput::with_template(t),
        None => PromptInput::new(),
    };
    input.set_input(&raw)?;
    tracing::info!("{}", input.size_label());

    let model = args
        .model
        .or_else(|| template.as_ref().map(|t| t.model_id.clone()))
        .unwrap_or_else(|| config.default_model.clone());
    let system = args
        .system
        .or_else(|| template.as_ref().and_then(|t| t.system_prompt.clone()));
    let reasoning_budget = args
        .reasoning_budget
        .or_else(|| template.as_ref().and_then(|t| t.reasoning).map(|r| r.budget_tokens));

    let mut payload = RequestPayload::new(Action::SendMessage, input.rendered(), model)
        .with_sampling(args.sampling.over(config.sampling))
        .with_images(args.images);
    if let Some(system) = system {
        payload = payload.with_system_prompt(system);
    }
    if let Some(budget) = reasoning_budget {
        payload = payload.with_reasoning(budget);
    }

    let mut slot = SessionSlot::new();
    let mut handle = slot.submit(&connector, payload).await?;
    let outcome = stream_to_terminal(&mut handle).await;
    Ok(exit_code(&outcome))
}

async fn chat(config: &Config, args: ChatArgs) -> anyhow::Result<ExitCode> {
    let connector = connector(config)?;
    let model = args.model.unwrap_or_else(|| config.default_model.clone());

    let mut conversation =
        Conversation::new(model).with_sampling(args.sampling.over(config.sampling));
    if let Some(system) = args.system {
        conversation = conversation.with_system_prompt(system);
    }
    eprintln!(
        "chat session {} with {} (empty line to quit)",
        conversation.session_id(),
        conversation.model_id()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            break;
        }

        let mut handle = match conversation.send(&connector, &line).await {
            Ok(h) => h,
            Err(e) => {
                eprintln!("error: {}", e.user_message());
                continue;
            }
        };
        stream_to_terminal(&mut handle).await;
        conversation.finish_turn(&handle.wait().await);
    }
    Ok(ExitCode::SUCCESS)
}

/// Print content to stdout and reasoning to stderr until the session ends.
async fn stream_to_terminal(handle: &mut SessionHandle) -> Outcome {
    let mut stdout = std::io::stdout();
    let mut in_reasoning = false;

    while let Some(event) = handle.next_event().await {
        match event {
            SessionEvent::Connected => {}
            SessionEvent::Reasoning(text) => {
                if !in_reasoning {
                    eprintln!("--- thinking ---");
                    in_reasoning = true;
                }
                eprint!("{text}");
            }
            SessionEvent::ReasoningRedacted => eprintln!("[some reasoning was redacted]"),
            SessionEvent::Content(text) => {
                if in_reasoning {
                    eprintln!("\n--- answer ---");
                    in_reasoning = false;
                }
                print!("{text}");
                stdout.flush().ok();
            }
            SessionEvent::Metrics(m) => {
                let rate = m
                    .output_tokens_per_second()
                    .map(|r| format!(", {r:.1} tok/s"))
                    .unwrap_or_default();
                tracing::info!(
                    "tokens in {} / out {}, latency {}ms{rate}",
                    m.input_tokens,
                    m.output_tokens,
                    m.latency_ms
                );
            }
            SessionEvent::Error(message) => eprintln!("\nerror: {message}"),
            SessionEvent::Finished(outcome) => {
                println!();
                // Server errors were already printed as they arrived.
                if !matches!(outcome, Outcome::ServerError(_))
                    && let Some(msg) = outcome.user_message()
                {
                    eprintln!("warning: {msg}");
                }
                return outcome;
            }
        }
    }
    handle
        .wait()
        .await
        .outcome()
        .cloned()
        .unwrap_or(Outcome::Disconnected)
}

fn exit_code(outcome: &Outcome) -> ExitCode {
    if outcome.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
