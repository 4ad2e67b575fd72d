//! CLI Module
//!
//! Headless command-line interface over the facade services using Clap v4.
//! The desktop shell talks to the same facade; this surface exists for
//! scripting and for driving the core without a GUI.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

/// ClaudeStation - token-economy client core for the Claude API
#[derive(Parser, Debug)]
#[command(name = "claude-station")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Project operations
    Project {
        #[command(subcommand)]
        operation: ProjectCommands,
    },

    /// Conversation operations
    Conversation {
        #[command(subcommand)]
        operation: ConversationCommands,
    },

    /// Send a message and stream the response
    Send {
        /// Conversation ID
        conversation: Uuid,

        /// Message text
        text: String,

        /// Print the cost estimate before sending
        #[arg(long)]
        estimate: bool,
    },

    /// Store the API key in ~/.claude-station/keys.toml
    SetKey {
        /// The API key
        key: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// List projects
    List,
    /// Create a project
    Create {
        name: String,
        /// System prompt text
        #[arg(long, default_value = "")]
        system_prompt: String,
        /// Default model
        #[arg(long)]
        model: Option<String>,
    },
    /// Add a document from a text file (extraction already done)
    AddDoc {
        project: Uuid,
        /// Path to the extracted text
        file: std::path::PathBuf,
    },
    /// List a project's documents
    Docs { project: Uuid },
    /// Delete a project and everything in it
    Delete { project: Uuid },
}

#[derive(Subcommand, Debug)]
pub enum ConversationCommands {
    /// List a project's conversations
    List { project: Uuid },
    /// Create a conversation
    Create {
        project: Uuid,
        #[arg(long, default_value = "New conversation")]
        title: String,
        /// Per-conversation model override
        #[arg(long)]
        model: Option<String>,
    },
    /// Export the raw transcript as Markdown
    Export { conversation: Uuid },
    /// Clear the rolling summary
    ResetSummary { conversation: Uuid },
    /// Archive or unarchive
    Archive {
        conversation: Uuid,
        #[arg(long)]
        undo: bool,
    },
}

/// Main CLI entry point
pub async fn run(config: crate::config::Config) -> Result<()> {
    let cli = Cli::parse();
    commands::dispatch(cli, config).await
}
