//! Collection Publisher CLI
//!
//! Publishes storage collections to B2SHARE, CKAN or Dataverse

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use collection_publisher::core::{
    ConfigLoadOptions, ConfigLoader, PublishConfig, PublishLog, PublishOptionsConfig, StorageKind,
};
use collection_publisher::drafts::{DraftKind, DraftLoader};
use collection_publisher::orchestration::history::DEFAULT_HISTORY_FILE;
use collection_publisher::orchestration::{
    FailurePolicy, HistoryFilter, PublishHistory, PublishWorkflow, StdinPrompt, WorkflowOptions,
};
use collection_publisher::{Collection, LocalAuthority, LocalStore, SecureTokenManager};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Publish storage collections to research data repositories
#[derive(Parser)]
#[command(name = "collection-publisher")]
#[command(version = "0.1.0")]
#[command(about = "Publish storage collections to B2SHARE, CKAN or Dataverse", long_about = None)]
struct Cli {
    /// Configuration file (replaces ./.collection-publisher.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a collection
    Publish {
        /// Collection path; relative names are joined to storage.collectionPrefix
        #[arg(value_name = "COLLECTION")]
        collection: String,

        /// Draft type (b2share, ckan, dataverse)
        #[arg(short = 't', long = "type")]
        draft_type: Option<String>,

        /// Keep downloaded temporary files
        #[arg(long)]
        no_cleanup: bool,

        /// Never prompt; a failing step aborts the run
        #[arg(long)]
        batch: bool,

        /// Publish even when steps failed
        #[arg(long)]
        force: bool,

        /// Do not upload data members
        #[arg(long)]
        no_upload: bool,

        /// Leave the collection read-only after publishing
        #[arg(long)]
        keep_closed: bool,
    },

    /// Check whether a collection can be published
    Check {
        #[arg(value_name = "COLLECTION")]
        collection: String,

        /// Draft type (b2share, ckan, dataverse)
        #[arg(short = 't', long = "type")]
        draft_type: Option<String>,
    },

    /// Display publish history statistics
    History {
        /// Filter by repository
        #[arg(short, long)]
        repository: Option<String>,

        /// Filter by collection path
        #[arg(long)]
        collection: Option<String>,

        /// Show only successful attempts
        #[arg(long)]
        success_only: bool,

        /// Show only aborted attempts
        #[arg(long)]
        failures_only: bool,

        /// Statistics for the last N days
        #[arg(long, default_value = "30")]
        days: i64,

        /// Number of recent attempts listed
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, !cli.no_color);

    match run(cli).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool, color: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(color)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Publish {
            ref collection,
            ref draft_type,
            no_cleanup,
            batch,
            force,
            no_upload,
            keep_closed,
        } => {
            let overrides = PublishConfig {
                draft_type: draft_type.clone(),
                publish: Some(PublishOptionsConfig {
                    batch: batch.then_some(true),
                    force: force.then_some(true),
                    upload: no_upload.then_some(false),
                    cleanup: no_cleanup.then_some(false),
                    keep_closed: keep_closed.then_some(true),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let config = load_config(cli.config.clone(), overrides, true).await?;
            publish_command(&config, collection).await
        }
        Commands::Check {
            ref collection,
            ref draft_type,
        } => {
            let overrides = PublishConfig {
                draft_type: draft_type.clone(),
                ..Default::default()
            };
            let config = load_config(cli.config.clone(), overrides, true).await?;
            check_command(&config, collection).await
        }
        Commands::History {
            repository,
            collection,
            success_only,
            failures_only,
            days,
            limit,
        } => {
            let config = load_config(cli.config.clone(), PublishConfig::default(), false).await?;
            let filter = HistoryFilter {
                repository,
                collection,
                start_date: Some(chrono::Utc::now() - chrono::Duration::days(days)),
                end_date: None,
                success_only,
                failures_only,
                limit: None,
            };
            history_command(&config, &filter, limit).await
        }
    }
}

async fn load_config(
    config_path: Option<PathBuf>,
    overrides: PublishConfig,
    validate: bool,
) -> Result<PublishConfig> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let config = ConfigLoader::load(ConfigLoadOptions {
        project_path: PathBuf::from("."),
        config_path,
        cli_args: Some(overrides),
        env,
    })
    .await?;
    if !validate {
        return Ok(config);
    }

    let validation = ConfigLoader::validate(&config);
    for warning in &validation.warnings {
        tracing::warn!("config {}: {}", warning.field, warning.message);
    }
    if !validation.valid {
        for error in &validation.errors {
            eprintln!("  - [{}] {}", error.field, error.message);
        }
        bail!("invalid configuration");
    }
    Ok(config)
}

/// Everything a workflow needs, built from configuration
struct Prepared {
    workflow: PublishWorkflow,
    upload_allowed: bool,
}

async fn prepare(config: &PublishConfig, collection: &str, log: PublishLog) -> Result<Prepared> {
    let storage = config.storage_options();
    let user = match storage.user.clone() {
        Some(user) => user,
        None => std::env::var("USER").context("no storage.user configured and USER is not set")?,
    };
    let zone = storage.zone.clone().unwrap_or_else(|| "zone".to_string());

    let store = match storage.kind.unwrap_or_default() {
        StorageKind::Local => {
            let root = storage
                .root
                .clone()
                .context("storage.root is required for a local store")?;
            Arc::new(LocalStore::open(root, zone.clone(), user.clone()).await?)
        }
        StorageKind::Memory => bail!("a memory store cannot be used from the command line"),
    };

    let path = if collection.starts_with('/') {
        collection.to_string()
    } else {
        let prefix = storage
            .collection_prefix
            .clone()
            .unwrap_or_else(|| format!("/{}/home/{}", zone, user));
        format!("{}/{}", prefix.trim_end_matches('/'), collection)
    };
    let collection = Collection::open(store, &path, log.clone()).await?;

    let loader = DraftLoader::new(config);
    let kind: DraftKind = loader.configured_kind()?;
    let mut tokens = SecureTokenManager::from_process_env();
    let draft = loader.load_draft(kind, &mut tokens, collection.name(), log.clone())?;

    let publish = config.publish_options();
    let mut upload = publish.upload.unwrap_or(true);
    if let Some(max) = publish.max_upload_bytes
        && collection.size() > max
    {
        log.warn(format!(
            "collection size {} exceeds {} bytes, publishing metadata only",
            collection.size(),
            max
        ));
        upload = false;
    }

    let identifiers = config.identifier_options();
    let options = WorkflowOptions {
        policy: FailurePolicy::from_flags(
            publish.batch.unwrap_or(false),
            publish.force.unwrap_or(false),
        ),
        upload,
        cleanup: publish.cleanup.unwrap_or(true),
        keep_closed: publish.keep_closed.unwrap_or(false),
        assign_pids: identifiers.assign_pids.unwrap_or(false),
        http_endpoint: storage.http_endpoint.clone(),
        report_collection: publish.report_collection.clone(),
    };

    let workflow = PublishWorkflow::new(
        collection,
        draft,
        Arc::new(LocalAuthority::new(identifiers.pid_prefix)),
        user,
        options,
        log,
    )
    .await?
    .with_prompt(Arc::new(StdinPrompt))
    .with_tokens(tokens);

    Ok(Prepared {
        workflow,
        upload_allowed: upload,
    })
}

fn report_log(config: &PublishConfig) -> PublishLog {
    let level = config
        .logging_options()
        .report_level
        .and_then(|level| Level::from_str(&level).ok())
        .unwrap_or(Level::INFO);
    PublishLog::new(level)
}

async fn publish_command(config: &PublishConfig, collection: &str) -> Result<i32> {
    println!("\n📦 collection-publisher\n");

    let mut prepared = prepare(config, collection, report_log(config)).await?;
    if !prepared.upload_allowed {
        println!("⚠️  Data will not be uploaded");
    }
    let report = prepared.workflow.run().await;

    let history_file = config
        .publish_options()
        .history_file
        .unwrap_or_else(|| DEFAULT_HISTORY_FILE.to_string());
    match PublishHistory::load(&history_file).await {
        Ok(mut history) => {
            if let Err(e) = history.record(&report).await {
                eprintln!("⚠️  Failed to record history: {}", e);
            }
        }
        Err(e) => eprintln!("⚠️  Failed to load history: {}", e),
    }

    if report.is_success() {
        println!("\n✅ Published {}", report.collection);
        if let Some(doi) = &report.doi {
            println!("  DOI: {}", doi);
        }
        if let Some(url) = &report.url {
            println!("  URL: {}", url);
        }
    } else {
        println!("\n❌ {}: {}", report.collection, report.status);
        if let Some(error) = &report.error {
            eprintln!("  - {}", error);
            for action in error.suggested_actions() {
                eprintln!("    → {}", action);
            }
        }
    }
    if let Some(location) = &report.location {
        println!("  Report: {}", location);
    }
    Ok(report.exit_code())
}

async fn check_command(config: &PublishConfig, collection: &str) -> Result<i32> {
    println!("\n🔍 Collection Check\n");

    let prepared = prepare(config, collection, report_log(config)).await?;
    let workflow = &prepared.workflow;

    if workflow.is_published() {
        println!(
            "  ❌ Already published: {}",
            workflow.repo_value("DOI").unwrap_or_default()
        );
        return Ok(3);
    }
    if workflow.check_collection() {
        println!(
            "  ✅ {} can be published to {}",
            workflow.collection().path(),
            workflow.draft().repo_name()
        );
        Ok(0)
    } else {
        println!("  ❌ Validation failed");
        Ok(4)
    }
}

async fn history_command(config: &PublishConfig, filter: &HistoryFilter, limit: usize) -> Result<i32> {
    println!("\n📊 Publish History\n");

    let history_file = config
        .publish_options()
        .history_file
        .unwrap_or_else(|| DEFAULT_HISTORY_FILE.to_string());
    let history = PublishHistory::load(&history_file).await?;
    println!("{}", history.markdown_summary(filter, limit));
    Ok(0)
}
