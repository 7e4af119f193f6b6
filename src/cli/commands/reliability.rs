//! Reliability telemetry commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::adapters::sqlite::{initialize_database_with, PoolConfig, SqliteReliabilityRepository};
use crate::cli::output::{output, percent, truncate, CommandOutput};
use crate::cli::table::{list_table, render_list};
use crate::domain::models::config::Config;
use crate::domain::models::{DashboardSummary, ReliabilityLayer, StrategyStats, ThresholdAnalysis};
use crate::services::ReliabilityTelemetry;

#[derive(Args, Debug)]
pub struct ReliabilityArgs {
    #[command(subcommand)]
    pub command: ReliabilityCommands,
}

#[derive(Subcommand, Debug)]
pub enum ReliabilityCommands {
    /// Show trigger and recovery rates for every layer
    Dashboard,
    /// Recommend a threshold from recent trigger and recovery rates
    Analyze {
        /// Layer (phase2-reproduction, phase3-loop-detection)
        #[arg(short, long)]
        layer: ReliabilityLayer,
        /// Threshold currently in effect
        #[arg(short, long)]
        current: i64,
        /// Lowest acceptable recommendation
        #[arg(long, default_value = "1")]
        min: i64,
        /// Highest acceptable recommendation
        #[arg(long, default_value = "100")]
        max: i64,
        /// Events required before recommending a change
        #[arg(long, default_value = "10")]
        min_data_points: usize,
    },
    /// Rank recovery strategies by historical success
    Strategies {
        /// Layer (phase2-reproduction, phase3-loop-detection)
        #[arg(short, long)]
        layer: ReliabilityLayer,
        /// Maximum strategies to show
        #[arg(long, default_value = "5")]
        limit: usize,
    },
    /// Delete events older than the retention period
    Prune {
        /// Retention in days (defaults to telemetry.retention_days)
        #[arg(short, long)]
        days: Option<u32>,
    },
}

#[derive(Debug, Serialize)]
pub struct DashboardOutput {
    #[serde(flatten)]
    pub summary: DashboardSummary,
}

impl CommandOutput for DashboardOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&[
            "layer",
            "events",
            "triggered",
            "trigger rate",
            "recoveries",
            "recovery rate",
            "top strategy",
        ]);
        for layer in &self.summary.layers {
            let top = layer
                .top_strategies
                .first()
                .map(|s| format!("{} ({})", s.strategy, percent(s.success_rate)))
                .unwrap_or_else(|| "-".to_string());
            table.add_row(vec![
                layer.layer.to_string(),
                layer.total_events.to_string(),
                layer.triggered.to_string(),
                percent(layer.trigger_rate),
                format!("{}/{}", layer.recovered, layer.recovery_attempts),
                percent(layer.recovery_success_rate),
                top,
            ]);
        }
        format!(
            "{table}\n\nTotal: {} events, {} triggered, {} recovered",
            self.summary.total_events, self.summary.total_triggered, self.summary.total_recovered
        )
    }
}

#[derive(Debug, Serialize)]
pub struct AnalysisOutput {
    #[serde(flatten)]
    pub analysis: ThresholdAnalysis,
}

impl CommandOutput for AnalysisOutput {
    fn to_human(&self) -> String {
        let a = &self.analysis;
        let change = match a.recommended_threshold.cmp(&a.current_threshold) {
            std::cmp::Ordering::Less => "lower",
            std::cmp::Ordering::Equal => "keep",
            std::cmp::Ordering::Greater => "raise",
        };
        [
            format!("Layer:        {}", a.layer),
            format!("Current:      {}", a.current_threshold),
            format!("Recommended:  {} ({change})", a.recommended_threshold),
            format!("Confidence:   {:.2}", a.confidence),
            format!(
                "Data points:  {} (trigger rate {}, recovery rate {})",
                a.data_points,
                percent(a.trigger_rate),
                percent(a.recovery_success_rate)
            ),
            format!("Reasoning:    {}", a.reasoning),
        ]
        .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StrategiesOutput {
    pub layer: ReliabilityLayer,
    pub strategies: Vec<StrategyStats>,
}

impl CommandOutput for StrategiesOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["strategy", "attempts", "successes", "success rate"]);
        for s in &self.strategies {
            table.add_row(vec![
                truncate(&s.strategy, 32),
                s.attempts.to_string(),
                s.successes.to_string(),
                percent(s.success_rate),
            ]);
        }
        render_list("strategy", "strategies", &table, self.strategies.len())
    }
}

#[derive(Debug, Serialize)]
pub struct PruneOutput {
    pub retention_days: u32,
    pub deleted: u64,
}

impl CommandOutput for PruneOutput {
    fn to_human(&self) -> String {
        format!(
            "Deleted {} event(s) older than {} day(s)",
            self.deleted, self.retention_days
        )
    }
}

pub async fn execute(args: ReliabilityArgs, config: &Config, json_mode: bool) -> Result<()> {
    let telemetry = open_telemetry(config).await?;

    match args.command {
        ReliabilityCommands::Dashboard => output(&dashboard(&telemetry).await?, json_mode),
        ReliabilityCommands::Analyze {
            layer,
            current,
            min,
            max,
            min_data_points,
        } => output(
            &analyze(&telemetry, layer, current, min, max, min_data_points).await?,
            json_mode,
        ),
        ReliabilityCommands::Strategies { layer, limit } => {
            output(&strategies(&telemetry, layer, limit).await?, json_mode);
        }
        ReliabilityCommands::Prune { days } => output(&prune(&telemetry, days).await?, json_mode),
    }

    telemetry.flush().await;
    Ok(())
}

async fn open_telemetry(config: &Config) -> Result<ReliabilityTelemetry> {
    let url = config.database.url();
    let pool = initialize_database_with(&url, Some(PoolConfig::from(&config.database)))
        .await
        .context(format!("Failed to open database at {url}"))?;
    Ok(ReliabilityTelemetry::spawn(
        Arc::new(SqliteReliabilityRepository::new(pool)),
        config.telemetry.clone(),
    ))
}

pub async fn dashboard(telemetry: &ReliabilityTelemetry) -> Result<DashboardOutput> {
    let summary = telemetry
        .get_dashboard_summary()
        .await
        .context("Failed to build dashboard summary")?;
    Ok(DashboardOutput { summary })
}

pub async fn analyze(
    telemetry: &ReliabilityTelemetry,
    layer: ReliabilityLayer,
    current: i64,
    min: i64,
    max: i64,
    min_data_points: usize,
) -> Result<AnalysisOutput> {
    if min > max {
        anyhow::bail!("--min ({min}) must not exceed --max ({max})");
    }
    let analysis = telemetry
        .analyze_threshold(layer, current, min, max, min_data_points)
        .await
        .context("Failed to analyze threshold")?;
    Ok(AnalysisOutput { analysis })
}

pub async fn strategies(
    telemetry: &ReliabilityTelemetry,
    layer: ReliabilityLayer,
    limit: usize,
) -> Result<StrategiesOutput> {
    let strategies = telemetry
        .get_top_strategies(layer, limit)
        .await
        .context("Failed to rank strategies")?;
    Ok(StrategiesOutput { layer, strategies })
}

pub async fn prune(telemetry: &ReliabilityTelemetry, days: Option<u32>) -> Result<PruneOutput> {
    let retention_days = days.unwrap_or(telemetry.config().retention_days);
    let deleted = telemetry
        .delete_old_events(retention_days)
        .await
        .context("Failed to prune reliability events")?;
    Ok(PruneOutput {
        retention_days,
        deleted,
    })
}
