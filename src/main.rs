//! fluxfetch - fetch-direction QC and crop attribution
//!
//! # Usage
//!
//! ```bash
//! # Attribute a sample file and write the flagged series plus a summary
//! fluxfetch attribute --input sgp_e14_2018.csv --output attributed.csv \
//!     --summary summary.json --network sgp --facility E14 --describe co2_flux
//!
//! # Fetch QC only, no classifier calls
//! fluxfetch attribute --input sgp_e14_2018.csv --qc-only --output flagged.csv
//!
//! # Inspect the sector table and test a bearing
//! fluxfetch sectors --network sgp --facility E14 --bearing 100
//! ```
//!
//! # Environment Variables
//!
//! - `FLUXFETCH_CONFIG`: Path to a TOML config file (overridden by `--config`)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fluxfetch::classifier::{CachedClassifier, CropClassifier, CropScapeClient, Unclassified};
use fluxfetch::config::{self, FetchConfig};
use fluxfetch::geodesy::GeodesicProjector;
use fluxfetch::ingest;
use fluxfetch::pipeline::{exclude_upstream_bad, AttributionPipeline, PipelineSettings};
use fluxfetch::qc::in_good_fetch;
use fluxfetch::report::{self, BatchSummary};
use fluxfetch::sectors::{self, SectorTable};
use fluxfetch::types::SiteKey;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "fluxfetch")]
#[command(about = "Fetch-direction QC and crop attribution for flux observations")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (default: $FLUXFETCH_CONFIG, then ./fluxfetch.toml)
    #[arg(long, global = true, value_name = "TOML")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Attribute samples: fetch QC flag and upwind crop for every row
    Attribute {
        /// Sample CSV file
        #[arg(long, value_name = "CSV")]
        input: PathBuf,

        /// Where to write the attributed series
        #[arg(long, value_name = "CSV")]
        output: Option<PathBuf>,

        /// Where to write the JSON batch summary
        #[arg(long, value_name = "JSON")]
        summary: Option<PathBuf>,

        /// Network code (overrides [site].network)
        #[arg(long)]
        network: Option<String>,

        /// Facility code (overrides [site].facility)
        #[arg(long)]
        facility: Option<String>,

        /// Sector table file (overrides [site].sector_file)
        #[arg(long, value_name = "TOML")]
        sector_file: Option<PathBuf>,

        /// Variable to describe per crop; repeatable
        #[arg(long = "describe", value_name = "VAR")]
        describe: Vec<String>,

        /// Skip classification; every label is undefined
        #[arg(long)]
        qc_only: bool,
    },

    /// Validate and list the sector table
    Sectors {
        /// Sector table file (default: built-in table)
        #[arg(long, value_name = "TOML")]
        file: Option<PathBuf>,

        /// Network code of the site to show
        #[arg(long, requires = "facility")]
        network: Option<String>,

        /// Facility code of the site to show
        #[arg(long, requires = "network")]
        facility: Option<String>,

        /// Evaluate fetch QC for this bearing (degrees)
        #[arg(long, requires = "facility", allow_negative_numbers = true)]
        bearing: Option<f64>,
    },
}

// ============================================================================
// Helpers
// ============================================================================

/// `--config` is strict; otherwise fall back through the standard search order.
fn load_config(path: Option<&Path>) -> Result<FetchConfig> {
    match path {
        Some(p) => FetchConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config {}", p.display())),
        None => Ok(FetchConfig::load()),
    }
}

fn load_sector_table(path: Option<&Path>) -> Result<SectorTable> {
    match path {
        Some(p) => SectorTable::load(p)
            .with_context(|| format!("Failed to load sector table {}", p.display())),
        None => SectorTable::builtin().context("Built-in sector table is invalid"),
    }
}

/// Cancel the token on Ctrl+C.
fn spawn_ctrl_c_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, stopping after the samples already in flight");
            shutdown_token.cancel();
        }
    });
    cancel_token
}

// ============================================================================
// Subcommands
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_attribute(
    config_path: Option<&Path>,
    input: &Path,
    output: Option<&Path>,
    summary_path: Option<&Path>,
    network: Option<String>,
    facility: Option<String>,
    sector_file: Option<PathBuf>,
    variables: &[String],
    qc_only: bool,
) -> Result<()> {
    let mut fetch_config = load_config(config_path)?;
    if let Some(n) = network {
        fetch_config.site.network = n;
    }
    if let Some(f) = facility {
        fetch_config.site.facility = f;
    }
    if let Some(s) = sector_file {
        fetch_config.site.sector_file = Some(s);
    }
    config::init(fetch_config);
    let cfg = config::get();

    let site = cfg.site.key();
    if site.network().is_empty() || site.facility().is_empty() {
        bail!("No site given: set [site] network/facility in the config or pass --network/--facility");
    }

    sectors::init_registry(load_sector_table(cfg.site.sector_file.as_deref())?);
    let table = sectors::registry();

    let loaded = ingest::load_samples(input, &cfg.input, cfg.site.origin())
        .with_context(|| format!("Failed to load samples from {}", input.display()))?;
    let samples = exclude_upstream_bad(loaded.samples);

    let projector: Arc<dyn GeodesicProjector> = Arc::from(cfg.projection.method.projector());
    let cached = if qc_only {
        None
    } else {
        let client = CropScapeClient::from_config(&cfg.gateway)
            .context("Failed to build CropScape client")?;
        info!(url = client.base_url(), "Classifying with CropScape");
        Some(Arc::new(CachedClassifier::new(client, cfg.gateway.cache_precision)))
    };
    let classifier: Arc<dyn CropClassifier> = match &cached {
        Some(c) => Arc::clone(c) as Arc<dyn CropClassifier>,
        None => Arc::new(Unclassified),
    };

    let pipeline = AttributionPipeline::new(
        site,
        table,
        projector,
        classifier,
        PipelineSettings::from_config(cfg),
    );
    let cancel_token = spawn_ctrl_c_handler();
    let outcome = pipeline.run(samples, &cancel_token).await;

    if let Some(path) = output {
        let columns: BTreeSet<String> = outcome
            .series
            .iter()
            .flat_map(|e| e.sample.variables.keys().cloned())
            .collect();
        let columns: Vec<String> = columns.into_iter().collect();
        report::write_series_csv(path, &outcome.series, &columns)?;
    }

    let mut summary = BatchSummary::build(&outcome, variables);
    if let Some(c) = &cached {
        summary = summary.with_cache(c.stats().await);
    }
    if let Some(path) = summary_path {
        summary.write_json(path)?;
    }

    print_summary(&summary, loaded.skipped_rows);
    Ok(())
}

fn print_summary(summary: &BatchSummary, skipped_rows: usize) {
    println!();
    println!("  Site:         {}", summary.site);
    println!("  Termination:  {}", summary.termination);
    println!("  Samples:      {}", summary.stats);
    if skipped_rows > 0 {
        println!("  Skipped rows: {skipped_rows}");
    }
    if let Some(cache) = &summary.cache {
        println!("  Cache:        {} hits, {} misses", cache.hits, cache.misses);
    }
    println!();
    println!("  Crops ({} undefined):", summary.crops.undefined);
    for share in &summary.crops.crops {
        println!("    {:<32} {:>7} ({:.1}%)", share.label, share.count, share.fraction * 100.0);
    }
    for (name, vars) in &summary.variables {
        println!();
        println!("  {name}:");
        let rows = [("all", vars.all.as_ref()), ("good fetch", vars.good_fetch.as_ref())]
            .into_iter()
            .chain(vars.by_crop.iter().map(|(label, d)| (label.as_str(), Some(d))));
        for (label, description) in rows {
            match description {
                Some(d) => println!(
                    "    {:<32} n={:<6} mean={:.4} median={:.4} min={:.4} max={:.4}",
                    label, d.count, d.mean, d.median, d.min, d.max
                ),
                None => println!("    {label:<32} no values"),
            }
        }
    }
    println!();
}

fn run_sectors(
    file: Option<&Path>,
    network: Option<&str>,
    facility: Option<&str>,
    bearing: Option<f64>,
) -> Result<()> {
    let table = load_sector_table(file)?;

    let Some((network, facility)) = network.zip(facility) else {
        println!("{} site(s) in sector table:", table.len());
        for (site, list) in table.sites() {
            let list: Vec<String> = list.iter().map(ToString::to_string).collect();
            println!("  {site:<12} {}", list.join(" "));
        }
        return Ok(());
    };

    let site = SiteKey::new(network, facility);
    let list = table.get(&site);
    if list.is_empty() {
        println!("{site}: no sectors configured (every bearing is insufficient fetch)");
    } else {
        let rendered: Vec<String> = list.iter().map(ToString::to_string).collect();
        println!("{site}: {}", rendered.join(" "));
    }

    if let Some(b) = bearing {
        let verdict = if in_good_fetch(Some(b), list) {
            "sufficient fetch (flag 0)"
        } else {
            "insufficient fetch (flag 1)"
        };
        println!("bearing {b}: {verdict}");
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    match args.command {
        SubCommand::Attribute {
            input,
            output,
            summary,
            network,
            facility,
            sector_file,
            describe,
            qc_only,
        } => {
            run_attribute(
                args.config.as_deref(),
                &input,
                output.as_deref(),
                summary.as_deref(),
                network,
                facility,
                sector_file,
                &describe,
                qc_only,
            )
            .await
        }
        SubCommand::Sectors {
            file,
            network,
            facility,
            bearing,
        } => run_sectors(file.as_deref(), network.as_deref(), facility.as_deref(), bearing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_attribute() {
        let args = CliArgs::try_parse_from([
            "fluxfetch",
            "attribute",
            "--input",
            "in.csv",
            "--describe",
            "co2_flux",
            "--describe",
            "h2o_flux",
            "--qc-only",
        ])
        .unwrap();
        match args.command {
            SubCommand::Attribute { input, describe, qc_only, .. } => {
                assert_eq!(input, PathBuf::from("in.csv"));
                assert_eq!(describe, vec!["co2_flux", "h2o_flux"]);
                assert!(qc_only);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_sectors_bearing_requires_site() {
        assert!(CliArgs::try_parse_from(["fluxfetch", "sectors", "--bearing", "40"]).is_err());
        assert!(CliArgs::try_parse_from([
            "fluxfetch", "sectors", "--network", "sgp", "--facility", "E14", "--bearing", "40"
        ])
        .is_ok());
    }

    #[test]
    fn test_run_sectors_builtin() {
        assert!(run_sectors(None, Some("sgp"), Some("E14"), Some(100.0)).is_ok());
        assert!(run_sectors(None, None, None, None).is_ok());
    }
}
