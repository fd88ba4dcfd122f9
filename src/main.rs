use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley::commands::{get_help_text, parse_slash_command, SlashCommand};
use parley::{
    Chat, ChatOptions, Config, ConversationEvent, MessageId, Role, SessionOutcome, Status,
};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "parley")]
#[command(version)]
#[command(about = "Chat with a streaming language-model backend", long_about = None)]
struct Cli {
    /// Chat endpoint URL (overrides config and PARLEY_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Send one message, print the reply, exit
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Check whether the backend answers
    Health,
    /// Write the effective configuration to ~/.parley/config.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?.with_overrides(cli.endpoint, cli.log_level);
    init_logging(&config.log_level);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_repl(&config).await,
        Commands::Ask { prompt } => ask(&config, &prompt.join(" ")).await,
        Commands::Health => {
            let chat = build_chat(&config)?;
            if chat.health_check().await {
                println!("✅ {} is reachable", config.endpoint);
                Ok(())
            } else {
                anyhow::bail!("{} is not reachable", config.endpoint)
            }
        }
        Commands::Init => {
            let path = Config::default_path().context("Could not determine home directory")?;
            config.save(&path)?;
            println!("📝 Wrote {}", path.display());
            Ok(())
        }
    }
}

/// Logs go to stderr so they never interleave with streamed replies.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("parley={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn build_chat(config: &Config) -> Result<Chat> {
    let options = ChatOptions::new(config.endpoint.clone())
        .with_connect_timeout(config.connect_timeout())
        .on_error(|err| eprintln!("\n❌ Error: {err}"));
    Chat::new(options).context("Failed to create chat client")
}

async fn ask(config: &Config, prompt: &str) -> Result<()> {
    let chat = build_chat(config)?;
    let renderer = tokio::spawn(render_events(chat.subscribe()));

    let outcome = chat.send_message(prompt).await;
    drop(chat);
    if let Err(err) = renderer.await {
        tracing::error!(error = %err, "renderer task failed");
    }

    match outcome {
        Some(SessionOutcome::Failed(err)) => Err(err.into()),
        None => anyhow::bail!("Nothing to send"),
        Some(_) => Ok(()),
    }
}

async fn run_repl(config: &Config) -> Result<()> {
    let chat = build_chat(config)?;
    let renderer = tokio::spawn(render_events(chat.subscribe()));

    println!("💬 parley, talking to {}", config.endpoint);
    println!("Type a message, or /help for commands.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        if let Some(command) = parse_slash_command(&line) {
            if chat.status().is_busy() && !command.available_during_streaming() {
                println!("⏳ A reply is still streaming; /stop it first.");
                continue;
            }
            match command {
                SlashCommand::Stop => chat.stop(),
                SlashCommand::Regenerate => {
                    let chat = chat.clone();
                    tokio::spawn(async move { chat.regenerate().await });
                }
                SlashCommand::History => print_history(&chat),
                SlashCommand::Health => {
                    if chat.health_check().await {
                        println!("✅ backend reachable");
                    } else {
                        println!("❌ backend unreachable");
                    }
                }
                SlashCommand::Help => println!("{}", get_help_text()),
                SlashCommand::Bye => break,
            }
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }
        if chat.status().is_busy() {
            println!("⏳ A reply is still streaming; /stop it first.");
            continue;
        }
        let chat = chat.clone();
        tokio::spawn(async move { chat.send_message(&line).await });
    }

    chat.stop();
    drop(chat);
    renderer.abort();
    println!("👋 Bye!");
    Ok(())
}

fn print_history(chat: &Chat) {
    let messages = chat.messages();
    if messages.is_empty() {
        println!("📭 No messages yet.");
        return;
    }
    for message in messages {
        let label = match message.role {
            Role::User => "👤 You",
            Role::Assistant => "🤖 Assistant",
        };
        let time = message.created_at.format("%H:%M:%S");
        println!("{label} [{time}]: {}", message.content);
    }
}

/// Print assistant content as it grows, one suffix at a time.
async fn render_events(mut rx: mpsc::UnboundedReceiver<ConversationEvent>) {
    let mut current: Option<MessageId> = None;
    let mut printed = 0usize;
    let mut stdout = std::io::stdout();

    while let Some(event) = rx.recv().await {
        match event {
            ConversationEvent::MessageAppended(message) if message.role == Role::Assistant => {
                current = Some(message.id);
                printed = 0;
                let _ = write!(stdout, "🤖 ");
            }
            ConversationEvent::ContentReplaced { id, content } if current == Some(id) => {
                if let Some(suffix) = content.get(printed..) {
                    let _ = write!(stdout, "{suffix}");
                }
                printed = content.len();
            }
            ConversationEvent::StatusChanged(Status::Ready | Status::Error)
                if current.is_some() =>
            {
                let _ = writeln!(stdout);
                current = None;
            }
            _ => {}
        }
        let _ = stdout.flush();
    }
}
