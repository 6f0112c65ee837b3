//! Link-to-Cable Mapping CLI
//!
//! Maps traceroute links to submarine cables.
//!
//! Usage:
//!   cable-mapper map --atlas-dir data/atlas \
//!                    --geolocation data/geolocation.json \
//!                    --sol data/sol.json \
//!                    --links data/links.json \
//!                    --output data/mapped_links.json
//!   cable-mapper merge-shards shard0.json shard1.json --output merged.json

use anyhow::Result;
use cable_mapper::io::{self, OutputEnvelope};
use cable_mapper::pipeline::{self, ReferenceData, ShardSpec};
use cable_mapper::EngineConfig;
use clap::{Parser, Subcommand, ValueEnum};
use geo_cluster::snapshot::{
    build_raw_cluster_map, build_sol_cluster_map, load_geolocation, load_sol,
};
use link_classifier::Category;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "cable-mapper", about = "Infer which submarine cable a traceroute link traverses")]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    /// Cluster raw estimates from all sources
    Raw,
    /// Cluster only speed-of-light-validated sources
    Sol,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Categorize links and map cable-suspect ones to cables
    Map {
        /// Directory with the cable atlas reference files
        #[arg(long, default_value = "data/atlas")]
        atlas_dir: PathBuf,

        /// Raw geolocation snapshot (required for the raw variant)
        #[arg(long, default_value = "data/geolocation.json")]
        geolocation: PathBuf,

        /// SoL validation snapshot (required for the sol variant)
        #[arg(long, default_value = "data/sol.json")]
        sol: PathBuf,

        /// Deduplicated link list
        #[arg(long, default_value = "data/links.json")]
        links: PathBuf,

        /// IP-to-operator mapping for the owner-match score term
        #[arg(long)]
        ip_orgs: Option<PathBuf>,

        /// Output JSON file
        #[arg(short, long, default_value = "data/mapped_links.json")]
        output: PathBuf,

        /// Also output GeoJSON
        #[arg(long)]
        geojson: bool,

        /// Which geolocation variant drives clustering
        #[arg(long, value_enum, default_value_t = Variant::Sol)]
        variant: Variant,

        /// Restrict the run to one category (for sharded runs)
        #[arg(long)]
        category: Option<Category>,

        /// Shard index within each category
        #[arg(long, default_value_t = 0)]
        shard_id: usize,

        /// Max links per shard; unset processes whole categories
        #[arg(long)]
        max_links_per_shard: Option<usize>,

        /// Directory for resumable checkpoints
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Ignore cables entering service after this year
        #[arg(long, default_value_t = 2024)]
        analysis_year: i32,

        /// Max SoL penalty ratio for a source to be accepted
        #[arg(long, default_value_t = 0.05)]
        sol_threshold: f64,

        /// Drop mapped links whose best score is below this bound
        #[arg(long)]
        min_score: Option<f64>,
    },
    /// Merge shard checkpoints into one output (last writer wins)
    MergeShards {
        /// Checkpoint files, in write order
        #[arg(required = true)]
        shards: Vec<PathBuf>,

        /// Output JSON file
        #[arg(short, long, default_value = "data/mapped_links.json")]
        output: PathBuf,
    },
}

/// Show the cables carrying the most mapped links
fn report_top_cables(results: &[cable_mapper::selection::LinkResult]) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for result in results {
        for selection in &result.selections {
            *counts.entry(selection.cable.as_str()).or_default() += 1;
        }
    }
    let mut sorted: Vec<(&str, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    info!("\nTop 10 cables by mapped links:");
    for (cable, count) in sorted.iter().take(10) {
        info!("  {count:6} | {cable}");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", "=".repeat(60));
    info!("Link-to-Cable Mapper");
    info!("{}", "=".repeat(60));

    match args.command {
        Command::Map {
            atlas_dir,
            geolocation,
            sol,
            links,
            ip_orgs,
            output,
            geojson,
            variant,
            category,
            shard_id,
            max_links_per_shard,
            checkpoint_dir,
            analysis_year,
            sol_threshold,
            min_score,
        } => {
            let config = EngineConfig {
                sol_threshold,
                analysis_year,
                ..EngineConfig::default()
            };
            let refs = ReferenceData::load(&atlas_dir, config.analysis_year)?;

            let clusters = match variant {
                Variant::Raw => {
                    let snapshot = load_geolocation(&geolocation)?;
                    build_raw_cluster_map(&snapshot)
                }
                Variant::Sol => {
                    let snapshot = load_sol(&sol)?;
                    build_sol_cluster_map(&snapshot, config.sol_threshold)
                }
            };

            let link_list = io::load_links(&links)?;
            let orgs = match ip_orgs {
                Some(path) => io::load_ip_orgs(&path)?,
                None => HashMap::new(),
            };

            if let Some(dir) = &checkpoint_dir {
                std::fs::create_dir_all(dir)?;
            }
            let shard = ShardSpec {
                shard_id,
                max_links_per_shard,
            };
            let run = pipeline::run(
                &link_list,
                &clusters,
                &refs,
                &orgs,
                &config,
                category,
                shard,
                checkpoint_dir.as_deref(),
            )?;

            let mut results: Vec<_> = run.results.into_values().collect();
            if let Some(bound) = min_score {
                let before = results.len();
                results.retain(|r| r.selections.first().is_some_and(|s| s.score >= bound));
                info!(
                    "Score filter >= {bound}: kept {} of {before} mapped links",
                    results.len()
                );
            }
            report_top_cables(&results);

            info!("\nWriting output to {:?}", output);
            let envelope = OutputEnvelope::new(results, run.categories, run.stats);
            io::write_output(&output, &envelope)?;

            if geojson {
                let geojson_path = output.with_extension("geojson");
                info!("Writing GeoJSON to {:?}", geojson_path);
                let rendered = io::to_geojson(&envelope.results, &refs.atlas);
                let file = File::create(&geojson_path)?;
                serde_json::to_writer_pretty(BufWriter::new(file), &rendered)?;
            }
        }
        Command::MergeShards { shards, output } => {
            let merged = pipeline::merge_checkpoints(&shards)?;
            info!("\nWriting merged output to {:?}", output);
            let results: Vec<_> = merged.results.into_values().collect();
            let envelope = OutputEnvelope::new(results, merged.categories, merged.stats);
            io::write_output(&output, &envelope)?;
        }
    }

    info!("Done");
    Ok(())
}
