//! agentchat: multi-agent chat sessions against local LLM endpoints
//!
//! A user proxy hands tasks to LLM assistants, runs the code they write and
//! stops when a reply ends with TERMINATE. A retrieval mode answers questions
//! with context pulled from a local document collection.

mod agent;
mod chat;
mod code_exec;
mod commands;
mod config;
mod human;
mod retrieve;
mod session;
mod termination;
#[cfg(test)]
mod testing;
mod transcript;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::code_exec::CodeExecutionConfig;
use crate::human::HumanInputMode;

#[derive(Debug, Parser)]
#[command(name = "agentchat")]
#[command(about = "Multi-agent chat sessions against local LLM endpoints", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: nearest agentchat.toml)
    #[arg(short, long, global = true, env = "AGENTCHAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the session: each task is handed to an assistant in turn
    Run {
        /// Tasks to run instead of the configured ones
        tasks: Vec<String>,

        /// Directory generated code is written to and run in
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Automatic replies before the proxy gives up
        #[arg(short, long)]
        max_auto_reply: Option<usize>,

        /// ALWAYS, TERMINATE or NEVER
        #[arg(long)]
        human_input_mode: Option<HumanInputMode>,

        /// Run generated code inside Docker
        #[arg(long)]
        use_docker: bool,

        /// Save a transcript (default location when no file is given)
        #[arg(long, num_args = 0..=1)]
        transcript: Option<Option<PathBuf>>,

        /// Do not print the conversation
        #[arg(short, long)]
        silent: bool,
    },

    /// Answer a problem with context retrieved from a document collection
    Retrieve {
        /// The question or coding problem
        #[arg(short, long)]
        problem: String,

        /// Only use documents containing this text
        #[arg(long)]
        search_string: Option<String>,

        /// Documents to index before retrieving
        #[arg(long)]
        docs_path: Option<PathBuf>,

        /// Vector store directory
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Collection name
        #[arg(long)]
        collection: Option<String>,

        /// Endpoint list: environment variable or file name holding JSON
        #[arg(long)]
        config_list: Option<String>,

        /// Directory searched for the config list file
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,

        /// Keep only endpoints serving these models
        #[arg(long = "filter-model")]
        filter_models: Vec<String>,

        /// Automatic replies before the proxy gives up
        #[arg(short, long, default_value = "2")]
        max_auto_reply: usize,

        /// Directory generated code is written to and run in
        #[arg(short, long, default_value = "extensions")]
        work_dir: PathBuf,

        /// Run generated code inside Docker
        #[arg(long)]
        use_docker: bool,

        /// Do not print the conversation
        #[arg(short, long)]
        silent: bool,
    },

    /// Build or refresh a document collection
    Index {
        /// Documents to index
        #[arg(long)]
        docs_path: PathBuf,

        /// Vector store directory
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Collection name
        #[arg(long)]
        collection: Option<String>,

        /// Maximum tokens per chunk
        #[arg(long)]
        chunk_token_size: Option<usize>,
    },

    /// Write a default agentchat.toml
    Init {
        /// Directory to write it to
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.config.as_deref();

    match cli.command {
        Some(Commands::Run {
            tasks,
            work_dir,
            max_auto_reply,
            human_input_mode,
            use_docker,
            transcript,
            silent,
        }) => {
            commands::run(
                config,
                commands::RunOverrides {
                    tasks,
                    work_dir,
                    max_auto_reply,
                    human_input_mode,
                    use_docker,
                },
                transcript,
                silent,
            )
            .await
        }
        Some(Commands::Retrieve {
            problem,
            search_string,
            docs_path,
            db_path,
            collection,
            config_list,
            config_dir,
            filter_models,
            max_auto_reply,
            work_dir,
            use_docker,
            silent,
        }) => {
            commands::retrieve(
                config,
                &problem,
                search_string.as_deref(),
                commands::RetrieveOverrides {
                    docs_path,
                    db_path,
                    collection,
                    chunk_token_size: None,
                },
                commands::EndpointSource {
                    config_list,
                    config_dir,
                    filter_models,
                },
                max_auto_reply,
                CodeExecutionConfig::new(work_dir).with_docker(use_docker),
                silent,
            )
            .await
        }
        Some(Commands::Index {
            docs_path,
            db_path,
            collection,
            chunk_token_size,
        }) => commands::index(
            config,
            commands::RetrieveOverrides {
                docs_path: Some(docs_path),
                db_path,
                collection,
                chunk_token_size,
            },
        ),
        Some(Commands::Init { dir }) => commands::init(&dir),
        None => {
            // Default to the session when no command is given
            commands::run(config, commands::RunOverrides::default(), None, false).await
        }
    }
}
