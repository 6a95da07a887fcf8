mod adapters;
mod config;
mod core;
mod error;
mod providers;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::core::workflow::WorkflowOrchestrator;
use crate::core::{AnalysisOutcome, PassKind};
use crate::providers::{Embedder, GithubProvider, HashingEmbedder, HttpEmbedder, KnowledgeBase};

#[derive(Parser)]
#[command(name = "prlens")]
#[command(about = "Multi-pass LLM pull-request analysis with adversarial comment filtering", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(long, global = true, help = "Repository in owner/name form")]
    repo: Option<String>,

    #[arg(long, global = true)]
    temperature: Option<f32>,

    #[arg(long, global = true)]
    max_tokens: Option<usize>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Analyze a pull request and emit the final comment set")]
    Analyze {
        #[arg(long, help = "Pull request number")]
        pr: u64,

        #[arg(long, help = "Post surviving comments back to the platform")]
        post: bool,

        #[arg(short, long, help = "Output file path (prints to stdout if not provided)")]
        output: Option<PathBuf>,

        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },
    #[command(about = "Merge a YAML snippet file into the reference-knowledge corpus")]
    SeedKnowledge {
        #[arg(long, help = "Target namespace: security, performance, clean-code, logical")]
        namespace: String,

        #[arg(long, help = "YAML list of snippets to merge")]
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = config::Config::load().unwrap_or_default();
    config.merge_with_cli(cli.model.clone(), cli.repo.clone());
    if let Some(temperature) = cli.temperature {
        config.temperature = temperature;
    }
    if let Some(max_tokens) = cli.max_tokens {
        config.max_tokens = max_tokens;
    }

    match cli.command {
        Commands::Analyze {
            pr,
            post,
            output,
            format,
        } => analyze_command(config, pr, post, output, format).await,
        Commands::SeedKnowledge { namespace, file } => seed_knowledge_command(config, namespace, file),
    }
}

async fn analyze_command(
    config: config::Config,
    pr: u64,
    post: bool,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    info!(pr, model = %config.model, "starting pull request analysis");

    let model_config = adapters::llm::ModelConfig {
        model_name: config.model.clone(),
        api_key: config.api_key.clone(),
        base_url: config.base_url.clone(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };
    let adapter: Arc<dyn adapters::LLMAdapter> = adapters::create_adapter(&model_config)?.into();
    info!(model = adapter.model_name(), "adapter ready");

    let embedder: Arc<dyn Embedder> = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => Arc::new(HttpEmbedder::new(
            key,
            None,
            config.embedding_model.clone(),
        )?),
        Err(_) => {
            warn!("OPENAI_API_KEY not set, falling back to local hashing embeddings");
            Arc::new(HashingEmbedder::default())
        }
    };

    let knowledge = match &config.knowledge_path {
        Some(path) if path.exists() => {
            KnowledgeBase::load(path, embedder.as_ref())
                .await
                .with_context(|| format!("Failed to load knowledge corpus {}", path.display()))?
        }
        _ => KnowledgeBase::empty(),
    };

    let (owner, repo) = config.repo_parts()?;
    let token = config
        .github_token
        .clone()
        .context("GitHub token not found. Set GITHUB_TOKEN or github_token in .prlens.yml")?;
    let provider = Arc::new(GithubProvider::new(token, owner, repo, None)?);

    let orchestrator = WorkflowOrchestrator::new(
        config,
        adapter,
        provider,
        embedder,
        Arc::new(knowledge),
    );

    let outcome = if post {
        orchestrator.analyze_and_publish(pr).await
    } else {
        orchestrator.analyze(pr).await
    };

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&outcome)?,
        OutputFormat::Markdown => format_as_markdown(&outcome),
    };

    if let Some(path) = output {
        tokio::fs::write(path, rendered).await?;
    } else {
        println!("{}", rendered);
    }

    Ok(())
}

fn seed_knowledge_command(config: config::Config, namespace: String, file: PathBuf) -> Result<()> {
    if !PassKind::ALL.iter().any(|k| k.as_str() == namespace) {
        anyhow::bail!(
            "unknown namespace '{}', expected one of: {}",
            namespace,
            PassKind::ALL
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let corpus_path = config
        .knowledge_path
        .unwrap_or_else(|| PathBuf::from(".prlens-knowledge.yml"));
    let added = providers::knowledge::merge_snippet_file(&corpus_path, &namespace, &file)?;
    println!(
        "Merged {} new snippets into {} ({})",
        added,
        corpus_path.display(),
        namespace
    );
    Ok(())
}

fn format_as_markdown(outcome: &AnalysisOutcome) -> String {
    let mut output = String::new();
    output.push_str("# Pull Request Analysis\n\n");

    if let Some(error) = &outcome.error {
        output.push_str(&format!("**Status:** error\n\n{}\n", error));
        return output;
    }

    output.push_str(&format!("**Comments:** {}\n\n", outcome.total_comments));

    if outcome.comments.is_empty() {
        output.push_str("No issues survived validation.\n");
        return output;
    }

    for comment in &outcome.comments {
        output.push_str(&format!(
            "## {}:{} ({:?})\n\n{}\n\n",
            comment.file, comment.line, comment.priority, comment.message
        ));
        output.push_str(&format!(
            "_Sources: {}_\n\n---\n\n",
            comment
                .source_kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    output
}
