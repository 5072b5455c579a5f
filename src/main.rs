use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use shopfront_recs::{
    config::Config,
    models::{ActionKind, EntityKind, ImpressionOutcome, ItemId, RecommendationKind, Strategy, UserId},
    App, AppResult,
};

/// Collaborative-filtering product recommendations
#[derive(Parser)]
#[command(name = "shopfront-recs")]
#[command(about = "Product recommendation engine over recorded shopper interactions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a shopper interaction with a product
    Record {
        #[arg(long)]
        user_id: i64,

        #[arg(long)]
        item_id: i64,

        /// view, add_to_cart, purchase, favorite or search
        #[arg(long)]
        action: ActionKind,

        /// RFC 3339 timestamp, defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Get recommendations for a shopper
    Recommend {
        #[arg(long)]
        user_id: i64,

        /// user-based, item-based or hybrid
        #[arg(long, default_value = "hybrid")]
        strategy: Strategy,

        /// Number of recommendations to return
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List products similar to a product
    Similar {
        #[arg(long)]
        item_id: i64,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Record a click or purchase on a served recommendation
    Outcome {
        #[arg(long)]
        user_id: i64,

        #[arg(long)]
        item_id: i64,

        /// user_based, item_based, hybrid or similar_items
        #[arg(long)]
        kind: RecommendationKind,

        /// clicked or purchased
        #[arg(long)]
        outcome: ImpressionOutcome,
    },

    /// Show the similarity score between two users or two items
    Similarity {
        #[arg(long)]
        a: i64,

        #[arg(long)]
        b: i64,

        /// user or item
        #[arg(long, default_value = "user")]
        entity: EntityKind,
    },
}

#[derive(Serialize)]
struct SimilarityOutput {
    a: i64,
    b: i64,
    entity: EntityKind,
    score: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    let app = App::from_config(&config)
        .await
        .context("Failed to initialize recommendation engine")?;

    // Background work is drained even when the command itself failed
    let outcome = run(&app, cli.command).await;
    app.shutdown().await;

    let output = outcome?;
    println!("{}", output);
    Ok(())
}

async fn run(app: &App, command: Commands) -> Result<String> {
    let engine = &app.engine;

    match command {
        Commands::Record {
            user_id,
            item_id,
            action,
            at,
        } => {
            let event = engine
                .record_interaction(UserId(user_id), ItemId(item_id), action, at.unwrap_or_else(Utc::now))
                .await;
            render(event)
        }
        Commands::Recommend {
            user_id,
            strategy,
            limit,
        } => render(engine.get_recommendations(UserId(user_id), strategy, limit).await),
        Commands::Similar { item_id, limit } => {
            render(engine.get_similar_items(ItemId(item_id), limit).await)
        }
        Commands::Outcome {
            user_id,
            item_id,
            kind,
            outcome,
        } => {
            let recorded = engine
                .record_impression_outcome(UserId(user_id), ItemId(item_id), kind, outcome)
                .await;
            render(recorded.map(|()| serde_json::json!({ "recorded": true })))
        }
        Commands::Similarity { a, b, entity } => {
            let score = engine.pairwise_similarity(a, b, entity).await;
            render(score.map(|score| SimilarityOutput { a, b, entity, score }))
        }
    }
}

fn render<T: Serialize>(result: AppResult<T>) -> Result<String> {
    let value = result.inspect_err(|e| {
        if e.is_rejection() {
            tracing::warn!(error = %e, "Request rejected");
        }
    })?;
    serde_json::to_string_pretty(&value).context("Failed to serialize output")
}
