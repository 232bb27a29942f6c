use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use case_study_forge::{
    config::{Config, LogFormat},
    export::ExportFormat,
    pipeline::CampaignBrief,
    server::{build_exporter, build_pipeline, AppState, McpServer},
    session::Session,
    storage::{SqliteStorage, Storage},
};

#[derive(Parser)]
#[command(name = "case-study-forge")]
#[command(about = "Draft marketing case studies from a campaign brief with web research and an LLM")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server on stdio (default)
    Serve,
    /// Run the whole pipeline once and write the result
    Generate {
        /// Path to a JSON campaign brief
        #[arg(long)]
        brief: PathBuf,
        /// Index of the style to use (defaults to the first offered)
        #[arg(long, default_value_t = 0)]
        style: usize,
        /// Feedback for one revision round
        #[arg(long)]
        feedback: Option<String>,
        /// Output directory (defaults to EXPORT_DIR)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Also render a PDF
        #[arg(long)]
        pdf: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Case study forge starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, storage).await,
        Command::Generate {
            brief,
            style,
            feedback,
            out,
            pdf,
        } => {
            if let Some(out) = out {
                config.export.output_dir = out;
            }
            generate(&config, &storage, &brief, style, feedback.as_deref(), pdf).await
        }
    }
}

async fn serve(config: Config, storage: SqliteStorage) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(config, storage)?);
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn generate(
    config: &Config,
    storage: &SqliteStorage,
    brief_path: &std::path::Path,
    style_index: usize,
    feedback: Option<&str>,
    pdf: bool,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read(brief_path)
        .await
        .with_context(|| format!("reading brief {}", brief_path.display()))?;
    let brief: CampaignBrief = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing brief {}", brief_path.display()))?;

    let pipeline = build_pipeline(config)?;
    let exporter = build_exporter(config);
    let mut session = Session::new();

    session.submit_brief(brief.clone())?;
    let context = pipeline.gather_context(&brief).await?;
    if context.is_incomplete() {
        warn!(
            shortfalls = context.shortfalls.len(),
            "Research incomplete, continuing with what was found"
        );
    }
    session.record_context(context.clone())?;

    let styles = pipeline.recommend_styles(&brief, &context).await;
    for (index, option) in styles.options.iter().enumerate() {
        info!(index, style = %option.label, "Style offered");
    }
    session.offer_styles(styles)?;
    let style = session.select_style(style_index)?.clone();

    let document = pipeline.compose(&brief, &style, &context).await?;
    session.record_document(document)?;

    if let Some(feedback) = feedback {
        let previous = session.begin_refinement()?;
        match pipeline.revise(&previous, feedback).await {
            Ok(revised) => session.record_document(revised)?,
            Err(e) => {
                session.cancel_refinement();
                return Err(e.into());
            }
        }
    }

    let document = session.document()?.clone();
    let mut formats = vec![ExportFormat::Markdown];
    if pdf {
        formats.push(ExportFormat::Pdf);
    }
    for format in formats {
        let artifact = exporter.export(&document, format).await?;
        println!("{}", artifact.path.display());
    }
    session.mark_exported()?;

    if let Err(e) = storage.archive_case_study(&document, Some(&session.id)).await {
        warn!(error = %e, "Failed to archive case study");
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
