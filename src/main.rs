use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::ThreadPoolBuilder;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use kmeans_partition::{
    generate_points, normalize, ClusterSet, DataLoader, NormalizedData, Normalization, Observer,
    ObserverError, PartitionConfig, PartitionError, PartitionOutcome, Partitioner,
    Result as PartitionResult, SnapshotObserver, TracingObserver, Vector,
};

#[derive(Parser, Debug)]
#[command(name = "kmeans-partition")]
#[command(about = "Partition vectors into k clusters with Lloyd's algorithm", long_about = None)]
struct Args {
    /// Number of clusters
    #[arg(short, long, default_value_t = 4)]
    k: usize,

    /// Number of points to generate when not using --input
    #[arg(short = 'n', long, default_value_t = 1024)]
    points: usize,

    /// Dimensionality of points when generating
    #[arg(short, long, default_value_t = 2)]
    dim: usize,

    /// Seed for synthetic data generation
    #[arg(long, default_value_t = 42u64)]
    data_seed: u64,

    /// Input dataset (CSV or Parquet)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Explicitly specify the input file format (default: auto-detect from extension)
    #[arg(long, value_enum)]
    format: Option<InputFormat>,

    /// Stop once fewer than this fraction of points changed cluster in an iteration
    #[arg(long, default_value_t = 0.01)]
    convergence: f64,

    /// Index of the last iteration allowed to run
    #[arg(short = 'i', long, default_value_t = 96)]
    max_iterations: usize,

    /// Seed for center initialisation and empty-cluster repair (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Min-max scale every dimension into [0, 1] before partitioning
    #[arg(long, default_value_t = false)]
    normalize: bool,

    /// Write the cluster state of every iteration as JSON into this directory
    #[arg(long)]
    snapshots: Option<PathBuf>,

    /// Pick k by silhouette score between --k-min and --k-max instead of using -k
    #[arg(long, default_value_t = false)]
    suggest: bool,

    /// Smallest cluster count tried by --suggest
    #[arg(long, default_value_t = 2)]
    k_min: usize,

    /// Largest cluster count tried by --suggest
    #[arg(long, default_value_t = 9)]
    k_max: usize,

    /// Partitions per candidate cluster count tried by --suggest (lowest inertia kept)
    #[arg(long, default_value_t = 10)]
    restarts: usize,

    /// Output file for centers and stats (JSON)
    #[arg(short, long, default_value = "partition_result.json")]
    output: PathBuf,

    /// Optional file containing per-sample cluster assignments (CSV)
    #[arg(long)]
    assignments: Option<PathBuf>,

    /// Override Rayon global thread pool size used by --suggest
    #[arg(long)]
    threads: Option<usize>,

    /// Verbosity: set RUST_LOG style level (info, debug, trace, warn)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum InputFormat {
    Csv,
    Parquet,
}

/// Logs every iteration and optionally dumps it to disk.
struct CliObserver {
    snapshots: Option<SnapshotObserver>,
}

impl Observer for CliObserver {
    fn observe(&self, clusters: &ClusterSet, iteration: usize) -> Result<(), ObserverError> {
        TracingObserver.observe(clusters, iteration)?;
        if let Some(snapshots) = &self.snapshots {
            snapshots.observe(clusters, iteration)?;
        }
        Ok(())
    }
}

fn main() {
    let args = Args::parse();
    if let Err(err) = init_logging(&args.log_level) {
        eprintln!("failed to initialise logging: {err}");
    }

    if let Err(err) = run(args) {
        error!(error = %err, "partition run failed");
        process::exit(1);
    }
}

fn init_logging(level: &str) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(match level {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|err| err.to_string())
}

fn run(args: Args) -> PartitionResult<()> {
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|err| {
                PartitionError::InvalidConfiguration(format!(
                    "failed to configure rayon threadpool: {err}"
                ))
            })?;
        info!(threads, "configured rayon global thread pool");
    }

    let config = PartitionConfig {
        convergence_fraction: args.convergence,
        max_iterations: args.max_iterations,
        seed: args.seed,
    };
    let snapshots = args.snapshots.as_deref().map(SnapshotObserver::new).transpose()?;
    let has_snapshots = snapshots.is_some();
    // Candidate runs of --suggest never write snapshots; only the reported run does.
    let scout = Partitioner::new(config.clone())?
        .with_observer(CliObserver { snapshots: None });
    let partitioner = Partitioner::new(config)?.with_observer(CliObserver { snapshots });

    let raw_data = load_data(
        args.input.as_deref(),
        args.format,
        args.points,
        args.dim,
        args.data_seed,
    )?;

    let (data, normalization): (Vec<Vector>, Option<Normalization>) = if args.normalize {
        let NormalizedData { data, params } = normalize(&raw_data);
        info!("applied min-max normalization to input features");
        (data, Some(params))
    } else {
        (raw_data, None)
    };

    let start = Instant::now();
    let outcome = if args.suggest {
        let suggestion = scout.suggest_k(&data, args.k_min..=args.k_max, args.restarts)?;
        info!(
            k = suggestion.k,
            score = suggestion.score,
            restarts = args.restarts,
            scores = ?suggestion.scores,
            "silhouette score per cluster count"
        );
        if has_snapshots {
            // Replays the winning run so its iterations land in the snapshot directory.
            let mut rng = ChaCha8Rng::seed_from_u64(suggestion.seed);
            partitioner.partition_with_rng(&data, suggestion.k, &mut rng)?
        } else {
            suggestion.outcome
        }
    } else {
        info!(
            k = args.k,
            rows = data.len(),
            convergence = args.convergence,
            max_iterations = args.max_iterations,
            seed = ?args.seed,
            "starting partition"
        );
        partitioner.partition_detailed(&data, args.k)?
    };
    let elapsed = start.elapsed();
    info!(
        inertia = outcome.inertia,
        iterations = outcome.iterations,
        termination = %outcome.termination,
        took_seconds = elapsed.as_secs_f64(),
        "partition finished"
    );
    info!(sizes = ?outcome.clusters.sizes(), "cluster population counts");

    write_result(
        &args,
        &data,
        &outcome,
        partitioner.config(),
        normalization.as_ref(),
        elapsed.as_secs_f64(),
    )?;

    if let Some(path) = args.assignments.as_ref() {
        write_assignments(path, &outcome)?;
    }

    Ok(())
}

fn load_data(
    input: Option<&Path>,
    format: Option<InputFormat>,
    points: usize,
    dim: usize,
    data_seed: u64,
) -> PartitionResult<Vec<Vector>> {
    if let Some(path) = input {
        let format_to_use =
            format.unwrap_or_else(|| infer_format(path).unwrap_or(InputFormat::Csv));
        info!(path = ?path, ?format_to_use, "loading input data");
        match format_to_use {
            InputFormat::Csv => DataLoader::load_csv(path),
            InputFormat::Parquet => DataLoader::load_parquet(path),
        }
    } else {
        if let Some(requested) = format {
            info!(
                ?requested,
                "ignoring --format because synthetic data will be generated"
            );
        }
        info!(points, dim, data_seed, "generating synthetic uniform data");
        let mut rng = ChaCha8Rng::seed_from_u64(data_seed);
        Ok(generate_points(points, dim, &mut rng))
    }
}

fn infer_format(path: &Path) -> Option<InputFormat> {
    path.extension().and_then(|ext| ext.to_str()).map(|ext| {
        match ext.to_ascii_lowercase().as_str() {
            "parquet" | "pq" => InputFormat::Parquet,
            _ => InputFormat::Csv,
        }
    })
}

fn write_result(
    args: &Args,
    data: &[Vector],
    outcome: &PartitionOutcome,
    config: &PartitionConfig,
    normalization: Option<&Normalization>,
    elapsed_secs: f64,
) -> PartitionResult<()> {
    let centers: Vec<Vec<f64>> = outcome
        .clusters
        .iter()
        .map(|cluster| match normalization {
            Some(params) => params.denormalize(&cluster.center).to_vec(),
            None => cluster.center.to_vec(),
        })
        .collect();

    let dump = json!({
        "k": outcome.clusters.len(),
        "dim": data.first().map(Vector::dim).unwrap_or(0),
        "rows": data.len(),
        "iterations": outcome.iterations,
        "termination": outcome.termination,
        "inertia": outcome.inertia,
        "cluster_sizes": outcome.clusters.sizes(),
        "elapsed_seconds": elapsed_secs,
        "normalized": args.normalize,
        "config": config,
        "centers": centers,
        "data_source": if let Some(path) = args.input.as_ref() {
            let fmt = args
                .format
                .or_else(|| infer_format(path))
                .unwrap_or(InputFormat::Csv);
            json!({
                "type": "file",
                "path": path.display().to_string(),
                "format": format!("{fmt:?}").to_lowercase(),
            })
        } else {
            json!({
                "type": "synthetic",
                "points": args.points,
                "dim": args.dim,
                "seed": args.data_seed,
            })
        },
        "assignments_path": args.assignments.as_ref().map(|p| p.display().to_string()),
        "snapshots_dir": args.snapshots.as_ref().map(|p| p.display().to_string()),
    });

    std::fs::write(&args.output, serde_json::to_string_pretty(&dump)?)?;
    info!(path = ?args.output, "wrote partition summary");
    Ok(())
}

fn write_assignments(path: &Path, outcome: &PartitionOutcome) -> PartitionResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["index", "cluster"])?;
    for (idx, cluster) in outcome.assignments.iter().enumerate() {
        writer.write_record([idx.to_string(), cluster.to_string()])?;
    }
    writer.flush()?;
    info!(path = ?path, "wrote assignments CSV");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{name}-{}", process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn suggest_writes_snapshots_of_the_reported_run_only() {
        let dir = scratch_dir("kmeans-partition-suggest");
        let output = dir.join("result.json");
        let snapshots = dir.join("snapshots");
        let args = Args::parse_from([
            "kmeans-partition".to_string(),
            "--suggest".into(),
            "--k-min".into(),
            "2".into(),
            "--k-max".into(),
            "4".into(),
            "--restarts".into(),
            "3".into(),
            "--seed".into(),
            "5".into(),
            "-n".into(),
            "60".into(),
            "--output".into(),
            output.display().to_string(),
            "--snapshots".into(),
            snapshots.display().to_string(),
        ]);

        run(args).unwrap();

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        let k = summary["k"].as_u64().unwrap();
        let iterations = summary["iterations"].as_u64().unwrap() as usize;
        let names: Vec<String> = std::fs::read_dir(&snapshots)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names.len(), iterations);
        assert!(names.iter().all(|name| name.starts_with(&format!("{k}_"))));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn suggest_reports_the_scored_partition() {
        let dir = scratch_dir("kmeans-partition-reuse");
        let output = dir.join("result.json");
        let args = Args::parse_from([
            "kmeans-partition".to_string(),
            "--suggest".into(),
            "--k-min".into(),
            "2".into(),
            "--k-max".into(),
            "4".into(),
            "--restarts".into(),
            "3".into(),
            "--seed".into(),
            "5".into(),
            "-n".into(),
            "60".into(),
            "--output".into(),
            output.display().to_string(),
        ]);

        run(args).unwrap();

        let data = load_data(None, None, 60, 2, 42).unwrap();
        let scout = Partitioner::new(PartitionConfig::default().with_seed(5)).unwrap();
        let expected = scout.suggest_k(&data, 2..=4, 3).unwrap();
        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();

        assert_eq!(summary["k"].as_u64().unwrap() as usize, expected.k);
        assert_eq!(
            summary["iterations"].as_u64().unwrap() as usize,
            expected.outcome.iterations
        );
        let inertia = summary["inertia"].as_f64().unwrap();
        assert!((inertia - expected.outcome.inertia).abs() < 1e-9);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
