//! Ensemble Prediction Engine
//!
//! CLI for running the engine as a long-lived service or issuing one-shot
//! predictions against a synthetic model pool.

use clap::{Parser, Subcommand};
use ensemble_engine::{
    config::Config,
    engine::EnsembleEngine,
    inference::{PassthroughFeatures, SyntheticLoader},
    types::{parse_feature_map, DeploymentStage, ModelDescriptor, ModelType, PredictionContext},
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ensemble-engine")]
#[command(about = "Multi-model ensemble prediction engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "ensemble.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with background maintenance loops
    Run,
    /// Issue a one-shot prediction
    Predict {
        /// Features as JSON, e.g. '{"pace": 98.5, "efficiency": 1.12}'
        #[arg(short, long)]
        features: String,
        /// Prediction context
        #[arg(long, default_value = "pre_game")]
        context: String,
    },
    /// List registered models
    Models,
    /// Show engine health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.filter.clone()));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run => run_engine(config).await,
        Commands::Predict { features, context } => predict_once(config, &features, &context).await,
        Commands::Models => show_models(config),
        Commands::Health => show_health(config).await,
    }
}

fn build_engine(config: Config) -> anyhow::Result<Arc<EnsembleEngine>> {
    let engine = Arc::new(EnsembleEngine::new(
        config,
        Arc::new(SyntheticLoader),
        Arc::new(PassthroughFeatures),
        None,
    ));
    register_synthetic_pool(&engine)?;
    Ok(engine)
}

/// Register the demo model pool
fn register_synthetic_pool(engine: &Arc<EnsembleEngine>) -> anyhow::Result<()> {
    let pool = [
        ("xgb_main", ModelType::Xgboost),
        ("lgbm_main", ModelType::Lightgbm),
        ("rf_main", ModelType::RandomForest),
        ("nn_main", ModelType::NeuralNetwork),
        ("linreg_baseline", ModelType::LinearRegression),
        ("lstm_sequence", ModelType::Lstm),
    ];
    for (name, model_type) in pool {
        let descriptor = ModelDescriptor::new(name, model_type, format!("synthetic://{}", name))
            .with_stage(DeploymentStage::Production);
        engine.registry().register(descriptor)?;
    }
    Ok(())
}

async fn run_engine(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting ensemble prediction engine");

    let engine = build_engine(config)?;
    engine.clone().start();

    // Periodic demo prediction so the log shows a live pipeline
    let demo_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            let features: HashMap<String, f64> = [
                ("pace".to_string(), 98.5),
                ("efficiency".to_string(), 1.12),
                ("rest_days".to_string(), 2.0),
            ]
            .into();
            match demo_engine
                .predict(&features, PredictionContext::PreGame, None)
                .await
            {
                Ok(p) => tracing::info!(
                    value = p.value,
                    agreement = p.model_agreement,
                    members = p.member_models.len(),
                    "Demo prediction"
                ),
                Err(e) => tracing::warn!(error = %e, "Demo prediction failed"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    engine.shutdown().await;
    Ok(())
}

async fn predict_once(config: Config, features_json: &str, context: &str) -> anyhow::Result<()> {
    let features = parse_feature_map(features_json)?;
    let context = PredictionContext::from_str(context)?;

    let engine = build_engine(config)?;
    let prediction = engine.predict(&features, context, None).await?;

    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

fn show_models(config: Config) -> anyhow::Result<()> {
    let engine = build_engine(config)?;

    println!("\nRegistered models:\n");
    println!("{:<20} {:<20} {:>10} {:>12}", "Name", "Type", "Stage", "Accuracy");
    println!("{}", "-".repeat(66));

    for name in engine.registry().get_active_models(None) {
        let descriptor = match engine.registry().descriptor(&name) {
            Some(d) => d,
            None => continue,
        };
        let accuracy = engine
            .registry()
            .metrics(&name)
            .map(|m| m.accuracy)
            .unwrap_or(0.0);
        println!(
            "{:<20} {:<20} {:>10?} {:>11.1}%",
            descriptor.name,
            descriptor.model_type.to_string(),
            descriptor.stage,
            accuracy * 100.0
        );
    }
    Ok(())
}

async fn show_health(config: Config) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let health = engine.health();
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}
