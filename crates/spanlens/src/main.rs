mod output;
mod telemetry;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use spanlens_core::config::Config;
use spanlens_core::filter::FilterFields;
use spanlens_core::model::span::{Span, SpanList};
use spanlens_core::time::{Granularity, parse_time_or_relative, time_intervals};
use spanlens_core::trajectory::build_trajectory_from_spans;
use spanlens_metrics::{MetricCatalog, PlatformSpanFilter, SpanEnv};

use crate::output::{
    MetricDescription, MetricListItem, print_intervals_human, print_matches_human,
    print_metric_description_human, print_metrics_list_human, print_trajectory_human,
};
use crate::telemetry::init_cli_tracing;

#[derive(Parser, Debug)]
#[command(name = "spanlens")]
#[command(about = "Filter, measure and reconstruct agent execution traces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Rebuild the agent trajectory of one trace")]
    Trajectory { spans: PathBuf },
    #[command(about = "Print the spans a filter selects")]
    Filter { filter: PathBuf, spans: PathBuf },
    #[command(about = "Validate a filter without evaluating it")]
    CheckFilter { filter: PathBuf },
    #[command(about = "Inspect the metric catalog")]
    Metrics {
        #[command(subcommand)]
        command: MetricsCommand,
    },
    #[command(about = "Print the time buckets covering a window")]
    Intervals {
        #[arg(long)]
        since: String,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        granularity: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum MetricsCommand {
    #[command(about = "List metric names")]
    List {
        #[arg(long, help = "Glob over metric names, e.g. 'model_*_pct99'")]
        pattern: Option<String>,
    },
    #[command(about = "Show how a metric is evaluated")]
    Describe {
        name: String,
        #[arg(long)]
        granularity: Option<String>,
        #[arg(long, default_value = "")]
        workspace: String,
        #[arg(long)]
        platform: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_tracing();
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Commands::Trajectory { spans } => {
            let spans: Vec<Span> = read_json(&spans)?;
            let trajectory = build_trajectory_from_spans(&spans);
            if cli.json {
                return print_json(&trajectory);
            }
            match trajectory {
                Some(t) => print_trajectory_human(&t),
                None => println!("no trajectory: no spans"),
            }
            Ok(())
        }
        Commands::Filter { filter, spans } => {
            let filter: FilterFields = read_json(&filter)?;
            filter.validate()?;
            let spans = SpanList::new(read_json(&spans)?);
            let matched: Vec<&Span> = spans.matching(&filter).collect();
            tracing::debug!(total = spans.len(), matched = matched.len(), "filter evaluated");
            if cli.json {
                let ids: Vec<&str> = matched.iter().map(|s| s.span_id.as_str()).collect();
                return print_json(&serde_json::json!({
                    "total": spans.len(),
                    "matched": ids,
                }));
            }
            print_matches_human(&matched, spans.len());
            Ok(())
        }
        Commands::CheckFilter { filter } => {
            let parsed: FilterFields = read_json(&filter)?;
            parsed
                .validate()
                .with_context(|| format!("{} is not a valid filter", filter.display()))?;
            let mut fields = 0usize;
            parsed.traverse(&mut |_| {
                fields += 1;
                Ok(())
            })?;
            if cli.json {
                return print_json(&serde_json::json!({ "valid": true, "fields": fields }));
            }
            println!("ok fields={fields}");
            Ok(())
        }
        Commands::Metrics { command } => {
            let catalog = MetricCatalog::builtin().context("failed to build metric catalog")?;
            run_metrics(command, &catalog, &config, cli.json)
        }
        Commands::Intervals {
            since,
            until,
            granularity,
        } => {
            let granularity = parse_granularity(granularity.as_deref(), &config)?;
            let start = parse_time_or_relative(&since)?;
            let end = match until {
                Some(v) => parse_time_or_relative(&v)?,
                None => Utc::now(),
            };
            if end < start {
                bail!("--until is before --since");
            }
            let span = (end - start).to_std().context("invalid window")?;
            if span > config.max_time_range {
                bail!(
                    "window is longer than max_time_range ({})",
                    humantime::format_duration(config.max_time_range)
                );
            }
            let starts = time_intervals(
                start.timestamp_millis(),
                end.timestamp_millis(),
                granularity,
            );
            if cli.json {
                return print_json(&serde_json::json!({
                    "granularity": granularity,
                    "intervals": starts,
                }));
            }
            print_intervals_human(&starts, granularity);
            Ok(())
        }
    }
}

fn run_metrics(
    command: MetricsCommand,
    catalog: &MetricCatalog,
    config: &Config,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        MetricsCommand::List { pattern } => {
            let defs = match pattern.as_deref() {
                Some(p) => catalog.matching(p)?,
                None => catalog.iter().collect(),
            };
            let items: Vec<MetricListItem<'_>> = defs.into_iter().map(MetricListItem::from).collect();
            if json {
                return print_json(&items);
            }
            print_metrics_list_human(&items);
            Ok(())
        }
        MetricsCommand::Describe {
            name,
            granularity,
            workspace,
            platform,
        } => {
            let def = catalog
                .get(&name)
                .with_context(|| format!("unknown metric: {name}"))?;
            let granularity = parse_granularity(granularity.as_deref(), config)?;
            if config.is_workspace_disabled(&workspace) {
                tracing::warn!(workspace_id = %workspace, "metrics are disabled for this workspace");
            }
            let env = SpanEnv {
                workspace_id: workspace,
                platform,
            };
            let description = MetricDescription::build(def, granularity, &PlatformSpanFilter, &env)?;
            if json {
                return print_json(&description);
            }
            print_metric_description_human(&description);
            Ok(())
        }
    }
}

fn parse_granularity(raw: Option<&str>, config: &Config) -> anyhow::Result<Granularity> {
    match raw {
        Some(v) => Ok(v.parse()?),
        None => Ok(config.default_granularity),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
