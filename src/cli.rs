use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "examrag",
    about = "Ask questions about your exam papers and notes"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory of source documents to index
    #[arg(long, global = true)]
    pub source_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bring the index up to date with the source directory
    Sync(SyncArgs),
    /// Answer a question from the indexed documents
    Ask(AskArgs),
    /// Inspect conversation memory (no sync, no API key needed)
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Show index and memory statistics without syncing
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Sync --

#[derive(Debug, Parser)]
pub struct SyncArgs {
    /// Rebuild the index from scratch
    #[arg(long)]
    pub rebuild: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub query: String,

    /// Number of document chunks to use as context
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Number of past turns to use as context
    #[arg(long)]
    pub memory_k: Option<usize>,

    /// Rebuild the index before answering
    #[arg(long)]
    pub rebuild: bool,

    /// Output the answer and its sources as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Memory --

#[derive(Debug, Subcommand)]
pub enum MemoryAction {
    /// Find past turns similar to a query
    Search {
        /// Text to compare against past turns
        query: String,
        /// Number of results to return
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List every recorded turn, oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "examrag",
            &mut std::io::stdout(),
        );
    }
}
