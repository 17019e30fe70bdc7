use clap::Args;
use rayon::prelude::*;
use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use crate::error::AppError;
use crate::matrix::{read_feature_matrix, DistanceMatrix};
use crate::store::{sample_key, ArtifactStore, Layer};
use crate::tree::neighbor_joining;

#[derive(Args, Debug)]
pub struct DendrogramArgs {
    /// Sample list file, one feature-matrix path per line
    #[arg(short = 's', long = "samples")]
    pub samples: String,
    /// Omics layer of the input matrices (DNA, RNA, Immune)
    #[arg(short = 'L', long = "layer")]
    pub layer: String,
    /// Output directory for distance matrices and trees
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Column to drop from every matrix before analysis (optional)
    #[arg(short = 'x', long = "exclude")]
    pub exclude: Option<String>,
    /// Label of the normal column
    #[arg(short = 'n', long = "normal", default_value = "N")]
    pub normal: String,
    /// Number of parallel threads
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,
    /// Clamp negative neighbor-joining branch lengths to zero. Changes the
    /// divergence/diversity totals downstream, so off by default.
    #[arg(long = "clamp-negative", default_value_t = false)]
    pub clamp_negative: bool,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

fn validate_dendrogram_args(args: &DendrogramArgs) -> Result<(), Box<dyn Error>> {
    if args.samples.trim().is_empty() {
        return Err("Error: Sample list path cannot be empty".into());
    }
    if !Path::new(&args.samples).exists() {
        return Err(format!("Error: Sample list does not exist: {}", args.samples).into());
    }
    args.layer
        .parse::<Layer>()
        .map_err(|e| format!("Error: {}", e))?;
    if args.output.trim().is_empty() {
        return Err("Error: Output directory cannot be empty".into());
    }
    if args.normal.trim().is_empty() {
        return Err("Error: Normal column label cannot be empty".into());
    }
    Ok(())
}

/// Read a sample list: one path per line, blank lines and '#' comments skipped
pub fn read_sample_list(path: &Path) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        entries.push(entry.to_string());
    }
    if entries.is_empty() {
        return Err(AppError::MalformedInput(
            path.display().to_string(),
            "sample list has no entries".to_string(),
        )
        .into());
    }
    Ok(entries)
}

/// Build and persist the distance matrix and neighbor-joining tree for one
/// sample file. Pure per-sample work: no console output, so it can run
/// inside a rayon pool.
fn process_sample(
    sample_path: &str,
    layer: Layer,
    store: &ArtifactStore,
    exclude: Option<&str>,
    normal: &str,
    clamp_negative: bool,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut matrix = read_feature_matrix(Path::new(sample_path))?;
    if let Some(column) = exclude {
        matrix = matrix.without_column(column)?;
    }
    if matrix.column_index(normal).is_none() {
        return Err(AppError::NormalTipNotFound(normal.to_string()).into());
    }

    let distances = DistanceMatrix::from_features(&matrix)?;
    let mut tree = neighbor_joining(&distances)?;
    if clamp_negative {
        tree.clamp_negative_lengths();
    }

    let key = sample_key(Path::new(sample_path));
    store.write_matrix(layer, &key, &distances)?;
    store.write_tree(layer, &key, &tree.to_newick())?;
    Ok(())
}

pub fn run_dendrogram(
    args: &DendrogramArgs,
    logger: &mut crate::Logger,
) -> Result<(), Box<dyn Error>> {
    validate_dendrogram_args(args)?;

    let start_time = Instant::now();
    let layer: Layer = args.layer.parse().map_err(|e| format!("Error: {}", e))?;
    let num_threads = args.threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });

    logger.log("=== ITHprofiler Dendrogram Function Log ===")?;
    logger.log(&format!("Software Version: v{}", crate::VERSION))?;
    logger.log(&format!(
        "Runtime: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    ))?;
    logger.log(&format!("Sample List: {}", args.samples))?;
    logger.log(&format!("Layer: {}", layer))?;
    logger.log(&format!("Output Directory: {}", args.output))?;
    logger.log(&format!("Normal Column: {}", args.normal))?;
    logger.log(&format!("Excluded Column: {:?}", args.exclude))?;
    logger.log(&format!("Threads: {}", num_threads))?;
    logger.log(&format!("Clamp Negative: {}", args.clamp_negative))?;
    logger.log("Starting dendrogram processing...")?;

    let samples = read_sample_list(Path::new(&args.samples)).map_err(|e| -> Box<dyn Error> { e })?;
    std::fs::create_dir_all(&args.output)?;
    let store = ArtifactStore::new(args.output.as_str());

    println!("[Loading data]");
    println!("    Sample list: {} ({} samples)", args.samples, samples.len());
    println!();
    println!("[Params]");
    println!("    Layer: {}.", layer);
    println!("    Normal column: {}.", args.normal);
    println!("    Threads: {}.", num_threads);
    println!();

    println!("[Processing] Building distance matrices and trees...");
    let results: Vec<Result<(), String>> = if num_threads > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        // par_iter keeps input order in the collected Vec, so the summary is
        // stable regardless of completion order
        pool.install(|| {
            samples
                .par_iter()
                .map(|sample| {
                    process_sample(
                        sample,
                        layer,
                        &store,
                        args.exclude.as_deref(),
                        &args.normal,
                        args.clamp_negative,
                    )
                    .map_err(|e| e.to_string())
                })
                .collect()
        })
    } else {
        let mut progress = crate::progress::BatchProgress::new(samples.len());
        let mut results = Vec::with_capacity(samples.len());
        for (i, sample) in samples.iter().enumerate() {
            progress.update(i + 1, sample)?;
            results.push(
                process_sample(
                    sample,
                    layer,
                    &store,
                    args.exclude.as_deref(),
                    &args.normal,
                    args.clamp_negative,
                )
                .map_err(|e| e.to_string()),
            );
        }
        progress.finish()?;
        results
    };

    let mut failed = 0;
    for (sample, result) in samples.iter().zip(&results) {
        match result {
            Ok(()) => logger.log(&format!("Sample {}: done", sample))?,
            Err(e) => {
                failed += 1;
                logger.log(&format!("Sample {}: FAILED: {}", sample, e))?;
            }
        }
    }

    let elapsed = start_time.elapsed();
    println!("[Output]");
    println!("    Artifacts: {}", args.output);
    println!(
        "[Summary] {} samples processed, {} failed",
        samples.len() - failed,
        failed
    );
    for (sample, result) in samples.iter().zip(&results) {
        if let Err(e) = result {
            println!("    {}: {}", sample, e);
        }
    }
    println!("{}", crate::progress::format_time_used(elapsed));

    logger.log(&format!(
        "Dendrogram processing completed, {} of {} samples failed",
        failed,
        samples.len()
    ))?;
    logger.log(&format!("Total time: {:.2}s", elapsed.as_secs_f64()))?;

    if failed == samples.len() {
        return Err("Error: All samples failed".into());
    }
    Ok(())
}
