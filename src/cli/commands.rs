//! Command handlers: wire the store, services and orchestrator together
//! and print results.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Cli, Commands, ConversationCommands, ProjectCommands};
use crate::api::AnthropicClient;
use crate::config::{Config, UserPaths};
use crate::db::{Database, Store};
use crate::orchestrator::{Orchestrator, UiEvent};
use crate::pricing::format_cost;
use crate::services::{ConversationService, ProjectService, ServiceContext};

async fn open_store(config: &Config) -> Result<Store> {
    let db = Database::connect(&config.database.path).await?;
    db.run_migrations().await?;
    Ok(Store::new(db))
}

async fn api_client(config: &Config, store: &Store) -> Result<AnthropicClient> {
    let key = match &config.api.api_key {
        Some(key) => key.clone(),
        None => store
            .active_api_key()
            .await?
            .map(|k| k.key)
            .context("no API key configured; run `claude-station set-key <key>`")?,
    };
    Ok(match &config.api.base_url {
        Some(base_url) => AnthropicClient::with_base_url(key, base_url.clone()),
        None => AnthropicClient::new(key),
    })
}

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let store = open_store(&config).await?;
    let context = ServiceContext::new(store.clone(), UserPaths::from_home());

    match cli.command {
        Commands::SetKey { key } => {
            store.set_api_key("default".to_string(), key.clone()).await?;
            Config::save_api_key(&key)?;
            println!("API key saved.");
            Ok(())
        }
        Commands::Project { operation } => project(operation, &config, context).await,
        Commands::Conversation { operation } => conversation(operation, context).await,
        Commands::Send {
            conversation,
            text,
            estimate,
        } => send(conversation, text, estimate, &config, store).await,
    }
}

async fn project(
    operation: ProjectCommands,
    config: &Config,
    context: ServiceContext,
) -> Result<()> {
    let service = ProjectService::new(context);
    match operation {
        ProjectCommands::List => {
            for project in service.list().await? {
                println!("{}  {}  [{}]", project.id, project.name, project.default_model);
            }
        }
        ProjectCommands::Create {
            name,
            system_prompt,
            model,
        } => {
            let model = model.unwrap_or_else(|| config.chat.default_model.clone());
            let project = service.create(name, system_prompt, model).await?;
            println!("{}", project.id);
        }
        ProjectCommands::AddDoc { project, file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {:?}", file))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document.txt".to_string());
            let file_type = file
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "txt".to_string());
            let document = service.add_document(project, filename, file_type, text).await?;
            println!("{}  ({} tokens)", document.id, document.token_count);
        }
        ProjectCommands::Docs { project } => {
            for document in service.list_documents(project).await? {
                println!(
                    "{}  {}  ({} tokens)",
                    document.id, document.filename, document.token_count
                );
            }
        }
        ProjectCommands::Delete { project } => {
            service.delete(project).await?;
            println!("Deleted.");
        }
    }
    Ok(())
}

async fn conversation(operation: ConversationCommands, context: ServiceContext) -> Result<()> {
    let service = ConversationService::new(context);
    match operation {
        ConversationCommands::List { project } => {
            for conversation in service.list(project).await? {
                let marker = if conversation.is_archived { " (archived)" } else { "" };
                let summary = match conversation.summary_token_count {
                    Some(tokens) => format!("  summary: {} tokens", tokens),
                    None => String::new(),
                };
                println!("{}  {}{}{}", conversation.id, conversation.title, marker, summary);
            }
        }
        ConversationCommands::Create {
            project,
            title,
            model,
        } => {
            let conversation = service.create(project, title, model).await?;
            println!("{}", conversation.id);
        }
        ConversationCommands::Export { conversation } => {
            print!("{}", service.export_transcript(conversation).await?);
        }
        ConversationCommands::ResetSummary { conversation } => {
            service.reset_summary(conversation).await?;
            println!("Summary cleared; the next message rebuilds context from the full history.");
        }
        ConversationCommands::Archive { conversation, undo } => {
            service.set_archived(conversation, !undo).await?;
            println!("{}", if undo { "Unarchived." } else { "Archived." });
        }
    }
    Ok(())
}

async fn send(
    conversation_id: uuid::Uuid,
    text: String,
    show_estimate: bool,
    config: &Config,
    store: Store,
) -> Result<()> {
    let api = Arc::new(api_client(config, &store).await?);
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::with_ui_sender(store, api, Some(ui_tx));

    if show_estimate {
        let estimate = orchestrator.estimate(conversation_id, &text).await?;
        let (cost, _) = format_cost(estimate.estimated_cost_usd);
        println!(
            "estimate: {} input tokens ({} cached) ≈ {}",
            estimate.estimated_input_tokens, estimate.estimated_cached_tokens, cost
        );
    }

    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = ui_rx.recv().await {
            match event {
                UiEvent::Chunk { text, .. } => {
                    let _ = write!(stdout, "{}", text);
                    let _ = stdout.flush();
                }
                UiEvent::ResponseComplete { usage, cost_usd, .. } => {
                    let _ = writeln!(stdout);
                    if let (Some(usage), Some(cost)) = (usage, cost_usd) {
                        let (cost, _) = format_cost(cost);
                        let _ = writeln!(
                            stdout,
                            "[input {} | cached {} | output {} | {}]",
                            usage.input_tokens, usage.cache_read_input_tokens, usage.output_tokens, cost
                        );
                    }
                }
                UiEvent::Warning { message, .. } => {
                    let _ = writeln!(stdout, "warning: {}", message);
                }
                _ => {}
            }
        }
    });

    let result = orchestrator
        .send(conversation_id, text, CancellationToken::new())
        .await;

    // Give the background worker a moment to fold old turns before exit;
    // a long-lived shell would stay subscribed instead.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    drop(orchestrator);
    printer.abort();

    result?;
    Ok(())
}
