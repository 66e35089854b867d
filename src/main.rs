#![deny(unsafe_code)]

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use everything2prompt_lib::adapters::configured_adapters;
use everything2prompt_lib::config::AppConfig;
use everything2prompt_lib::help::{query_help, TagDescriptions};
use everything2prompt_lib::models::SourceKind;
use everything2prompt_lib::refresh::RefreshWorkflow;
use everything2prompt_lib::server::ToolServer;
use everything2prompt_lib::session::QuerySession;
use everything2prompt_lib::{init_tracing, run_query};
use std::path::PathBuf;

/// Personal data cache and prompt renderer.
#[derive(Parser, Debug)]
#[command(name = "everything2prompt", version, disable_help_subcommand = true)]
struct Cli {
    /// YAML configuration file; environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write JSON logs to a daily rolling file in this directory instead of stderr.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-fetch sources and rewrite their cached records.
    Refresh {
        /// Sources to refresh; all of them when omitted.
        #[arg(long, num_args = 1.., value_delimiter = ',', value_parser = parse_source)]
        sources: Vec<SourceKind>,

        /// Todoist look-back window for completed tasks, in days.
        #[arg(long)]
        api_num_days_back: Option<u32>,
    },
    /// Run a query against the cache and print the rendered prompt.
    Query {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Print the query language guide for the current cache.
    Help,
    /// Serve the query tool over stdio (newline-delimited JSON-RPC).
    Serve,
}

fn parse_source(value: &str) -> Result<SourceKind, String> {
    value.parse::<SourceKind>().map_err(|error| error.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let log_dir = cli.log_dir.clone().or_else(|| config.log_dir.clone());
    init_tracing(log_dir.as_deref()).context("failed to initialize logging")?;

    let descriptions = || {
        config
            .tag_descriptions_path
            .as_deref()
            .map(TagDescriptions::load)
            .unwrap_or_default()
    };

    match cli.command {
        Command::Refresh {
            sources,
            api_num_days_back,
        } => {
            let config = config.clone().with_days_back(api_num_days_back)?;
            let adapters = configured_adapters(&config)?;
            let workflow = RefreshWorkflow::new(config.store(), adapters, config.lock_timeout());
            let report = workflow.refresh(&sources).context("refresh failed")?;
            println!("{}", report);
        }
        Command::Query { query } => {
            let query = query.join(" ");
            let mut session = QuerySession::new(config.store());
            let text = run_query(&mut session, &query, Local::now().naive_local())?;
            println!("{}", text);
        }
        Command::Help => {
            let mut session = QuerySession::new(config.store());
            let records = session.records();
            println!("{}", query_help(&records, &descriptions()));
        }
        Command::Serve => {
            let session = QuerySession::new(config.store());
            let mut server = ToolServer::new(session, descriptions());
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            server
                .serve(stdin.lock(), stdout.lock())
                .context("tool server I/O failed")?;
        }
    }
    Ok(())
}
