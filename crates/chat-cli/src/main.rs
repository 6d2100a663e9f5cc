use anyhow::{bail, Context};
use chat_core::config::convo_dir;
use chat_core::message::removal_set;
use chat_core::{
    AppConfig, BpeTokenCounter, ContextTrimmer, Conversation, GenerationEvent, JsonlMessageStore,
    Message, MessageStore, ModelConfig, Role, TokenCounter,
};
use chat_generation::{
    GenerationConfig, GenerationCoordinator, GenerationHandle, GenerationOutcome,
    GenerationRequest, GenerationStatus, RegenerationRequest,
};
use chat_llm::{LLMProvider, OpenAICompatProvider};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

mod render;

use render::{Delta, StreamPrinter};

#[derive(Parser)]
#[command(name = "convo")]
#[command(about = "Chat with OpenAI-compatible models from the terminal")]
#[command(version)]
struct Cli {
    /// Config file (JSON or TOML); defaults to ~/.convo/config.json or ./config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding conversations and messages
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Model id, display name or model name
    #[arg(long, short, global = true)]
    model: Option<String>,

    /// Enable debug mode
    #[arg(long, short, global = true, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message and stream the reply
    Send {
        /// Message content
        message: String,
        /// Continue an existing conversation
        #[arg(long, short)]
        conversation: Option<String>,
        /// Image URL or data URL to attach
        #[arg(long)]
        image: Option<String>,
        /// Ask thinking-capable models to reason first
        #[arg(long)]
        think: bool,
    },
    /// Generate another answer for an assistant message
    Regenerate {
        #[arg(long, short)]
        conversation: String,
        /// Assistant message id; defaults to the latest reply
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        think: bool,
    },
    /// List conversations, or the messages of one
    History {
        #[arg(long, short)]
        conversation: Option<String>,
    },
    /// Choose which answer of a message is displayed
    Select {
        #[arg(long, short)]
        conversation: String,
        #[arg(long)]
        message: String,
        /// 0 is the original answer
        index: usize,
    },
    /// Replace a message's content, keeping its place in the conversation
    Edit {
        #[arg(long, short)]
        conversation: String,
        #[arg(long)]
        message: String,
        content: String,
    },
    /// Delete a message; a user message takes its reply with it
    Delete {
        #[arg(long, short)]
        conversation: String,
        #[arg(long)]
        message: String,
    },
    /// Token usage of a conversation against the model's context window
    Usage {
        #[arg(long, short)]
        conversation: String,
    },
    /// Count tokens in a piece of text
    Tokens {
        text: String,
        /// Print the individual tokens
        #[arg(long)]
        show: bool,
    },
    /// List configured and served models
    Models {
        /// Only check that the endpoint answers
        #[arg(long)]
        check: bool,
    },
}

struct App {
    config: AppConfig,
    store: Arc<JsonlMessageStore>,
    counter: Arc<BpeTokenCounter>,
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::from_path(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
        None => AppConfig::load(),
    };

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| convo_dir().join("data"));
    let store = Arc::new(JsonlMessageStore::new(&data_dir));
    store
        .init()
        .await
        .with_context(|| format!("Failed to prepare {}", data_dir.display()))?;

    if cli.debug {
        eprintln!("{} data dir: {}", "[DEBUG]".dimmed(), data_dir.display());
    }

    let app = App {
        counter: Arc::new(BpeTokenCounter::new(config.tokenizer.path.clone())),
        config,
        store,
        debug: cli.debug,
    };
    let model = cli.model.as_deref();

    match cli.command {
        Commands::Send {
            message,
            conversation,
            image,
            think,
        } => send(&app, model, message, conversation, image, think).await,
        Commands::Regenerate {
            conversation,
            message,
            think,
        } => regenerate(&app, model, &conversation, message.as_deref(), think).await,
        Commands::History { conversation } => history(&app, conversation.as_deref()).await,
        Commands::Select {
            conversation,
            message,
            index,
        } => select(&app, &conversation, &message, index).await,
        Commands::Edit {
            conversation,
            message,
            content,
        } => edit(&app, &conversation, &message, content).await,
        Commands::Delete {
            conversation,
            message,
        } => delete(&app, &conversation, &message).await,
        Commands::Usage { conversation } => usage(&app, model, &conversation).await,
        Commands::Tokens { text, show } => tokens(&app, &text, show).await,
        Commands::Models { check } => models(&app, model, check).await,
    }
}

fn resolve_model(config: &AppConfig, key: Option<&str>) -> anyhow::Result<ModelConfig> {
    let model = match key {
        Some(key) => config
            .find_model(key)
            .with_context(|| format!("Unknown model '{}'", key))?,
        None => config.default_model().context(
            "No model configured. Set API_BASE and MODEL or add a model to ~/.convo/config.json",
        )?,
    };
    Ok(model.clone())
}

/// An explicit `--model` wins over the model the conversation was started with.
fn conversation_model(
    config: &AppConfig,
    key: Option<&str>,
    conversation: &Conversation,
) -> anyhow::Result<ModelConfig> {
    if key.is_none() {
        if let Some(model) = config.find_model(&conversation.model_config_id) {
            return Ok(model.clone());
        }
    }
    resolve_model(config, key)
}

fn coordinator(app: &App) -> anyhow::Result<GenerationCoordinator> {
    let transport: Arc<dyn LLMProvider> = Arc::new(OpenAICompatProvider::new()?);
    let store: Arc<dyn MessageStore> = app.store.clone();
    Ok(GenerationCoordinator::new(
        transport,
        app.counter.clone(),
        store,
        GenerationConfig::default(),
    ))
}

async fn load_conversation(app: &App, conversation_id: &str) -> anyhow::Result<Conversation> {
    app.store
        .load_conversation(conversation_id)
        .await?
        .with_context(|| format!("Conversation '{}' not found", conversation_id))
}

async fn send(
    app: &App,
    model_key: Option<&str>,
    text: String,
    conversation_id: Option<String>,
    image: Option<String>,
    think: bool,
) -> anyhow::Result<()> {
    let mut conversation = match conversation_id {
        Some(id) => load_conversation(app, &id).await?,
        None => {
            let model = resolve_model(&app.config, model_key)?;
            let conversation = Conversation::new(&text, model.id);
            println!(
                "{} {} {}",
                "Conversation:".cyan(),
                conversation.id,
                format!("({})", conversation.title).dimmed()
            );
            conversation
        }
    };

    let model = conversation_model(&app.config, model_key, &conversation)?;

    let mut user_message = Message::user(&conversation.id, text);
    if let Some(image) = image {
        user_message = user_message.with_image(image);
    }
    app.store.insert_or_replace(&user_message).await?;
    conversation.touch();
    app.store.save_conversation(&conversation).await?;

    let history = app.store.get_messages(&conversation.id).await?;
    let mut settings = app.config.settings.clone();
    settings.thinking_enabled |= think;

    let coordinator = coordinator(app)?;
    let events = coordinator.subscribe();
    let handle = coordinator
        .start(GenerationRequest {
            conversation_id: conversation.id.clone(),
            history,
            model,
            settings,
        })
        .await;

    let outcome = stream_to_stdout(app, &coordinator, events, &handle).await?;

    conversation.touch();
    app.store.save_conversation(&conversation).await?;
    report(outcome)
}

async fn regenerate(
    app: &App,
    model_key: Option<&str>,
    conversation_id: &str,
    message_id: Option<&str>,
    think: bool,
) -> anyhow::Result<()> {
    let mut conversation = load_conversation(app, conversation_id).await?;
    let history = app.store.get_messages(conversation_id).await?;

    let target = match message_id {
        Some(id) => history.iter().find(|m| m.id == id),
        None => history.iter().rev().find(|m| m.role == Role::Assistant),
    }
    .cloned()
    .context("No assistant message to regenerate")?;

    let model = conversation_model(&app.config, model_key, &conversation)?;
    let mut settings = app.config.settings.clone();
    settings.thinking_enabled |= think;

    let coordinator = coordinator(app)?;
    let events = coordinator.subscribe();
    let handle = coordinator
        .regenerate(RegenerationRequest {
            target,
            history,
            model,
            settings,
        })
        .await?;

    let outcome = stream_to_stdout(app, &coordinator, events, &handle).await?;
    if let Some(message) = outcome.message.as_ref() {
        println!(
            "{}",
            format!(
                "answer {}/{}",
                message.current_alternative_index + 1,
                message.total_alternatives()
            )
            .dimmed()
        );
    }

    conversation.touch();
    app.store.save_conversation(&conversation).await?;
    report(outcome)
}

/// Print events until the generation ends. Ctrl-C cancels it and keeps
/// whatever was already streamed.
async fn stream_to_stdout(
    app: &App,
    coordinator: &GenerationCoordinator,
    mut events: broadcast::Receiver<GenerationEvent>,
    handle: &GenerationHandle,
) -> anyhow::Result<GenerationOutcome> {
    let mut printer = StreamPrinter::default();
    let mut stdout = io::stdout();

    loop {
        let received = tokio::select! {
            _ = tokio::signal::ctrl_c(), if !handle.is_cancelled() => {
                eprintln!("\n{}", "Cancelling...".yellow());
                handle.cancel();
                continue;
            }
            received = events.recv() => received,
        };

        let event = match received {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("[{}] Skipped {} generation events", handle.message_id, skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if event_message_id(&event).is_some_and(|id| id != handle.message_id) {
            continue;
        }

        match &event {
            GenerationEvent::ContextPrepared { usage } => {
                if app.debug || usage.truncation_occurred {
                    eprintln!(
                        "{}",
                        format!(
                            "context: {}/{} tokens, {} message(s) trimmed",
                            usage.total_tokens, usage.budget_limit, usage.messages_removed
                        )
                        .dimmed()
                    );
                }
            }
            GenerationEvent::Started { message } => {
                log::debug!("[{}] Streaming started", message.id);
            }
            GenerationEvent::Updated {
                message_id,
                content,
                thinking_content,
                ..
            } => {
                let delta = printer.update(message_id, thinking_content.as_deref(), content);
                print_delta(&mut stdout, &delta)?;
            }
            GenerationEvent::Completed { message } => {
                match message {
                    Some(message) => print_delta(&mut stdout, &printer.finish(message))?,
                    None => print!("{}", "(empty response)".dimmed()),
                }
                println!();
            }
            GenerationEvent::Cancelled { message } => {
                if let Some(message) = message {
                    print_delta(&mut stdout, &printer.finish(message))?;
                }
                println!("\n{}", "[cancelled]".yellow());
            }
            GenerationEvent::Error { message, persisted } => {
                if persisted.is_some() {
                    println!();
                }
                eprintln!("{} {}", "Error:".red(), message);
            }
        }

        if event.is_terminal() {
            break;
        }
    }

    coordinator
        .wait()
        .await
        .context("Generation ended without an outcome")
}

fn event_message_id(event: &GenerationEvent) -> Option<&str> {
    match event {
        GenerationEvent::Started { message } => Some(&message.id),
        GenerationEvent::Updated { message_id, .. } => Some(message_id),
        _ => None,
    }
}

fn print_delta(stdout: &mut io::Stdout, delta: &Delta) -> io::Result<()> {
    if delta.is_empty() {
        return Ok(());
    }
    if !delta.thinking.is_empty() {
        write!(stdout, "{}", delta.thinking.dimmed())?;
    }
    if delta.answer_started {
        writeln!(stdout, "\n")?;
    }
    write!(stdout, "{}", delta.content)?;
    stdout.flush()
}

fn report(outcome: GenerationOutcome) -> anyhow::Result<()> {
    match outcome.status {
        GenerationStatus::Completed | GenerationStatus::Cancelled => Ok(()),
        GenerationStatus::Failed(error) => bail!("Generation failed: {}", error),
    }
}

async fn history(app: &App, conversation_id: Option<&str>) -> anyhow::Result<()> {
    let Some(conversation_id) = conversation_id else {
        let conversations = app.store.list_conversations().await?;
        if conversations.is_empty() {
            println!("{}", "No conversations yet".dimmed());
        }
        for conversation in conversations {
            println!(
                "{}  {}  {}",
                conversation.id.cyan(),
                conversation.updated_at.format("%Y-%m-%d %H:%M"),
                conversation.title
            );
        }
        return Ok(());
    };

    let conversation = load_conversation(app, conversation_id).await?;
    println!("{}", conversation.title.bold());

    for message in app.store.get_messages(conversation_id).await? {
        let role = match message.role {
            Role::User => "user".green(),
            Role::Assistant => "assistant".cyan(),
            Role::System => "system".magenta(),
        };
        let position = if message.alternatives.is_empty() {
            String::new()
        } else {
            format!(
                " [{}/{}]",
                message.current_alternative_index + 1,
                message.total_alternatives()
            )
        };
        println!("\n{}{} {}", role, position, message.id.dimmed());
        if let Some(thinking) = message.display_thinking_content() {
            println!("{}", thinking.dimmed());
        }
        if message.has_image() {
            println!("{}", "[image]".dimmed());
        }
        println!("{}", message.display_content());
    }
    Ok(())
}

async fn find_message(
    app: &App,
    conversation_id: &str,
    message_id: &str,
) -> anyhow::Result<Message> {
    app.store
        .get_messages(conversation_id)
        .await?
        .into_iter()
        .find(|m| m.id == message_id)
        .with_context(|| format!("Message '{}' not found", message_id))
}

async fn select(
    app: &App,
    conversation_id: &str,
    message_id: &str,
    index: usize,
) -> anyhow::Result<()> {
    let mut message = find_message(app, conversation_id, message_id).await?;

    let selected = message.select_alternative(index);
    app.store.insert_or_replace(&message).await?;

    println!(
        "{}",
        format!("answer {}/{}", selected + 1, message.total_alternatives()).dimmed()
    );
    println!("{}", message.display_content());
    Ok(())
}

async fn edit(
    app: &App,
    conversation_id: &str,
    message_id: &str,
    content: String,
) -> anyhow::Result<()> {
    let message = find_message(app, conversation_id, message_id).await?;
    app.store.insert_or_replace(&message.edited(content)).await?;
    println!("{} {}", "Updated".green(), message_id);
    Ok(())
}

async fn delete(app: &App, conversation_id: &str, message_id: &str) -> anyhow::Result<()> {
    let messages = app.store.get_messages(conversation_id).await?;
    let ids = removal_set(&messages, message_id);
    if ids.is_empty() {
        bail!("Message '{}' not found", message_id);
    }
    for id in &ids {
        app.store.delete(id).await?;
    }
    println!("{} {} message(s)", "Deleted".green(), ids.len());
    Ok(())
}

async fn usage(app: &App, model_key: Option<&str>, conversation_id: &str) -> anyhow::Result<()> {
    let conversation = load_conversation(app, conversation_id).await?;
    let model = conversation_model(&app.config, model_key, &conversation)?;

    app.counter.ensure_initialized().await;
    let messages = app.store.get_messages(conversation_id).await?;
    let settings = &app.config.settings;
    let trimmer =
        ContextTrimmer::new(app.counter.as_ref()).with_reserve(settings.response_reserve);

    let info = trimmer.token_info(&messages, &settings.system_prompt);
    let trimmed = trimmer.trim(&messages, &settings.system_prompt, model.context_length);

    println!(
        "{} {} messages, {} tokens ({} system)",
        "History:".cyan(),
        info.message_count,
        info.total_tokens,
        info.system_prompt_tokens
    );
    println!(
        "{} {} of {} tokens, {} message(s) dropped ({:?})",
        "Request:".cyan(),
        trimmed.token_usage.total_tokens,
        trimmed.token_usage.budget_limit,
        trimmed.messages_removed,
        trimmed.outcome
    );
    if !info.tokenizer_loaded {
        println!("{}", "Counts are estimates; no tokenizer loaded".dimmed());
    }
    Ok(())
}

async fn tokens(app: &App, text: &str, show: bool) -> anyhow::Result<()> {
    if let Err(e) = app.counter.initialize().await {
        eprintln!("{} {}", "Using estimate:".yellow(), e);
    }

    println!("{} {}", "Tokens:".cyan(), app.counter.count_tokens(text));
    if let Some(vocab_size) = app.counter.vocab_size() {
        println!("{} {}", "Vocabulary:".cyan(), vocab_size);
    }
    if show {
        match app.counter.tokenize(text) {
            Some(tokens) => println!("{}", tokens.join(" | ")),
            None => println!("{}", "No tokenizer loaded".dimmed()),
        }
    }
    Ok(())
}

async fn models(app: &App, model_key: Option<&str>, check: bool) -> anyhow::Result<()> {
    for model in &app.config.models {
        let marker = if model.is_default { "*" } else { " " };
        println!(
            "{} {}  {}  {}",
            marker,
            model.display_name.cyan(),
            model.model_name,
            format!("({} tokens)", model.context_length).dimmed()
        );
    }

    let model = resolve_model(&app.config, model_key)?;
    let provider = OpenAICompatProvider::new()?;

    if check {
        provider.test_connection(&model).await?;
        println!("{} {}", "Reachable:".green(), model.base_url);
        return Ok(());
    }

    let served = provider.list_models(&model).await?;
    println!("\n{} {}", "Served by".cyan(), model.base_url);
    for name in served {
        println!("  {}", name);
    }
    Ok(())
}
