use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod capture;
mod dissect;
mod distance;
mod error;
mod features;
mod kmeans;
mod report;
mod stats;

use error::ProfilerError;
use report::{ClusterReport, SessionReport};
use stats::Aggregator;

#[derive(Parser, Debug)]
#[command(name = "traffic-profiler")]
#[command(about = "Per-source traffic histograms and k-means cluster labels from captured frames")]
#[command(version = "1.0.0")]
struct Args {
    /// Increase log verbosity (-v: debug, -vv: trace with payload dumps)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Profile an offline capture file (consumes the entire file)
    File {
        /// Capture file containing a pcap dump
        file: String,

        /// Number of clusters for the anomaly-labeling step
        #[arg(short, long, default_value_t = 4)]
        clusters: usize,

        /// Iteration bound for k-means
        #[arg(long, default_value_t = kmeans::DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,

        /// Maximum bytes per packet considered for the size histogram
        #[arg(long, default_value_t = dissect::DEFAULT_SNAP_LEN)]
        snaplen: usize,

        /// Write the session report to this path as JSON
        #[arg(long)]
        json: Option<String>,
    },
    /// Profile live traffic from a network interface
    Live {
        /// Capture device name (default: first available device)
        #[arg(short, long)]
        interface: Option<String>,

        /// Number of packets to capture
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u64,

        /// Number of clusters for the anomaly-labeling step
        #[arg(short, long, default_value_t = 4)]
        clusters: usize,

        /// Iteration bound for k-means
        #[arg(long, default_value_t = kmeans::DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,

        /// Maximum bytes per packet considered for the size histogram
        #[arg(long, default_value_t = dissect::DEFAULT_SNAP_LEN)]
        snaplen: usize,

        /// Write the session report to this path as JSON
        #[arg(long)]
        json: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let max_level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(max_level).init();

    match args.command {
        Commands::File {
            file,
            clusters,
            max_iterations,
            snaplen,
            json,
        } => {
            let mut aggregator = Aggregator::new(snaplen);
            let frames = capture::replay_file(&file, &mut aggregator, snaplen)?;
            info!("Capture complete: {} frames", frames);
            finish_session(&aggregator, clusters, max_iterations, json.as_deref())
        }
        Commands::Live {
            interface,
            count,
            clusters,
            max_iterations,
            snaplen,
            json,
        } => {
            let mut aggregator = Aggregator::new(snaplen);
            let frames =
                capture::capture_live(interface.as_deref(), count, &mut aggregator, snaplen)?;
            info!("Capture complete: {} frames", frames);
            finish_session(&aggregator, clusters, max_iterations, json.as_deref())
        }
    }
}

/// Session epilogue: project histograms into feature vectors, cluster them,
/// and render the report.
fn finish_session(
    aggregator: &Aggregator,
    clusters: usize,
    max_iterations: usize,
    json: Option<&str>,
) -> Result<()> {
    let histograms = aggregator.histograms();
    let counters = aggregator.counters();

    let vectors = features::build_vectors(histograms);
    info!("Built {} feature vectors", vectors.len());

    let cluster_report = match kmeans::cluster(&vectors, clusters, max_iterations) {
        Ok(assignment) => Some(ClusterReport::new(&vectors, &assignment, clusters)),
        Err(e @ ProfilerError::InsufficientSamples { .. }) => {
            warn!("Skipping clustering: {}", e);
            None
        }
        Err(e) => return Err(e.into()),
    };

    report::print_report(histograms, counters, cluster_report.as_ref());

    if let Some(path) = json {
        let session = SessionReport {
            frames: counters,
            histograms,
            clusters: cluster_report.as_ref(),
        };
        report::write_json(path, &session)?;
        info!("Report written to {}", path);
    }
    Ok(())
}
