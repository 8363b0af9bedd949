//! codedoc CLI.
//!
//! Command-line driver for the codedoc engine: ingest archives or
//! remote repositories, inspect ingestion status, and ask questions
//! with streamed, citation-bearing answers.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use uuid::Uuid;

use codedoc_core::types::QueryEvent;
use codedoc_core::{Config, Engine};

/// codedoc - ask questions about your codebase.
#[derive(Parser, Debug)]
#[command(name = "codedoc", version, about = "Code-documentation assistant engine")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Log level filter.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest a source archive (.tar.gz, .tgz, .tar).
    Ingest {
        /// Path to the archive file.
        archive: String,

        /// Human name for the codebase (defaults to the file name).
        #[arg(long)]
        name: Option<String>,

        /// Optional description.
        #[arg(long)]
        description: Option<String>,
    },

    /// Ingest a remote repository by clone URL.
    Clone {
        /// Clone URL (https or git).
        url: String,

        /// Human name for the codebase (defaults to the URL tail).
        #[arg(long)]
        name: Option<String>,
    },

    /// Ask a question about an ingested codebase.
    Ask {
        /// Codebase id.
        codebase: Uuid,

        /// The question.
        question: String,

        /// Session id to continue a conversation.
        #[arg(long)]
        session: Option<Uuid>,
    },

    /// Show ingestion status for a codebase.
    Status {
        /// Codebase id.
        codebase: Uuid,
    },

    /// List all codebases.
    List,

    /// Delete a codebase and everything derived from it.
    Delete {
        /// Codebase id.
        codebase: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    let config = Config::load(std::path::Path::new("."))?;
    let engine = Arc::new(Engine::new(config)?);

    match cli.command {
        Commands::Ingest { archive, name, description } => {
            tracing::info!(archive = %archive, "ingesting archive");
            let bytes = std::fs::read(&archive)
                .with_context(|| format!("reading archive {archive}"))?;
            let file_name = std::path::Path::new(&archive)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&archive)
                .to_string();
            let name = name.unwrap_or_else(|| file_name.clone());

            let codebase =
                engine.upload_archive(&name, description.as_deref(), &file_name, &bytes)?;
            println!("codebase {} queued for ingestion", codebase.id);

            engine.wait_for_ingestion(codebase.id).await;
            print_status(&engine, codebase.id)?;
        }
        Commands::Clone { url, name } => {
            tracing::info!(url = %url, "ingesting remote repository");
            let name = name.unwrap_or_else(|| {
                url.rsplit('/')
                    .next()
                    .unwrap_or("repository")
                    .trim_end_matches(".git")
                    .to_string()
            });
            let codebase = engine.register_remote(&name, None, &url)?;
            println!("codebase {} queued for ingestion", codebase.id);

            engine.wait_for_ingestion(codebase.id).await;
            print_status(&engine, codebase.id)?;
        }
        Commands::Ask { codebase, question, session } => {
            let mut stream = engine.query(codebase, session, &question).await?;
            while let Some(event) = stream.next().await {
                match event {
                    QueryEvent::SessionId { session_id } => {
                        eprintln!("session: {session_id}");
                    }
                    QueryEvent::Chunk { content } => {
                        use std::io::Write;
                        print!("{content}");
                        let _ = std::io::stdout().flush();
                    }
                    QueryEvent::Sources { sources } => {
                        println!();
                        if !sources.is_empty() {
                            println!("sources:");
                            for citation in sources {
                                println!(
                                    "  {}:{}-{}",
                                    citation.file_path, citation.line_start, citation.line_end
                                );
                            }
                        }
                    }
                    QueryEvent::Done => break,
                    QueryEvent::Error { error } => {
                        anyhow::bail!("query failed: {error}");
                    }
                }
            }
        }
        Commands::Status { codebase } => {
            print_status(&engine, codebase)?;
        }
        Commands::List => {
            for codebase in engine.list()? {
                println!(
                    "{}  {:<24} {:<10} {}/{} files",
                    codebase.id,
                    codebase.name,
                    codebase.status,
                    codebase.processed_files,
                    codebase.total_files,
                );
            }
        }
        Commands::Delete { codebase } => {
            engine.delete(codebase).await?;
            println!("deleted {codebase}");
        }
    }

    Ok(())
}

fn print_status(engine: &Engine, codebase: Uuid) -> Result<()> {
    let status = engine.status(codebase)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
