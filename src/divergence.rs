use clap::Args;
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crate::dendrogram::read_sample_list;
use crate::error::AppError;
use crate::store::{ArtifactStore, Layer, ALL_LAYERS};
use crate::tree::{branch_score, neighbor_joining, robinson_foulds, Tree};

#[derive(Args, Debug)]
pub struct DivergenceArgs {
    /// Sample list file, one sample file name per line (as used by the
    /// dendrogram stage)
    #[arg(short = 's', long = "samples")]
    pub samples: String,
    /// Directory holding the persisted distance matrices
    #[arg(short = 'a', long = "artifacts")]
    pub artifacts: String,
    /// Output directory for the aggregate tables
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Label of the normal tip
    #[arg(short = 'n', long = "normal", default_value = "N")]
    pub normal: String,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

/// Tree length decomposition for one omics layer of one sample
#[derive(Debug, Clone)]
pub struct LayerStats {
    pub layer: Layer,
    pub total: f64,
    pub divergence: f64,
    pub diversity: f64,
    /// Path distance from the normal tip to every tumor region, in the
    /// matrix's column order
    pub normal_distances: Vec<(String, f64)>,
}

/// Everything the analyzer derives from one sample's three matrices
#[derive(Debug, Clone)]
pub struct SampleReport {
    pub sample: String,
    pub layers: Vec<LayerStats>,
    pub rf_distance: usize,
    pub branch_score: f64,
}

fn layer_stats(tree: &Tree, labels: &[String], layer: Layer, normal: &str) -> Result<LayerStats, AppError> {
    let normal_id = tree
        .find_leaf(normal)
        .ok_or_else(|| AppError::NormalTipNotFound(normal.to_string()))?;

    let total = tree.total_length();
    let divergence = tree.incident_length(normal_id);
    let diversity = total - divergence;

    let mut normal_distances = Vec::new();
    for label in labels {
        if label == normal {
            continue;
        }
        let leaf = tree
            .find_leaf(label)
            .ok_or_else(|| AppError::NormalTipNotFound(label.clone()))?;
        normal_distances.push((label.clone(), tree.path_length(normal_id, leaf)));
    }

    Ok(LayerStats {
        layer,
        total,
        divergence,
        diversity,
        normal_distances,
    })
}

/// Rebuild the three per-layer trees from their persisted matrices and
/// derive the cross-omic summary for one sample
pub fn analyze_sample(
    store: &ArtifactStore,
    sample: &str,
    normal: &str,
) -> Result<SampleReport, Box<dyn Error + Send + Sync>> {
    let mut layers = Vec::with_capacity(ALL_LAYERS.len());
    let mut trees = Vec::with_capacity(ALL_LAYERS.len());

    for layer in ALL_LAYERS {
        let matrix = store.read_matrix(layer, sample)?;
        let tree = neighbor_joining(&matrix)?;
        layers.push(layer_stats(&tree, &matrix.labels, layer, normal)?);
        trees.push(tree);
    }

    // ALL_LAYERS order is DNA, RNA, Immune
    let rf_distance = robinson_foulds(&trees[0], &trees[1])?;
    let score = branch_score(&trees[0], &trees[1])?;

    Ok(SampleReport {
        sample: sample.to_string(),
        layers,
        rf_distance,
        branch_score: score,
    })
}

fn validate_divergence_args(args: &DivergenceArgs) -> Result<(), Box<dyn Error>> {
    if args.samples.trim().is_empty() {
        return Err("Error: Sample list path cannot be empty".into());
    }
    if !Path::new(&args.samples).exists() {
        return Err(format!("Error: Sample list does not exist: {}", args.samples).into());
    }
    if !Path::new(&args.artifacts).is_dir() {
        return Err(format!(
            "Error: Artifact directory does not exist: {}",
            args.artifacts
        )
        .into());
    }
    if args.output.trim().is_empty() {
        return Err("Error: Output directory cannot be empty".into());
    }
    Ok(())
}

fn write_aggregates(
    reports: &[SampleReport],
    output_dir: &Path,
) -> Result<(), Box<dyn Error>> {
    let file = File::create(output_dir.join("ith_decomposition.txt"))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "Sample\tLayer\tTotal\tDivergence\tDiversity")?;
    for report in reports {
        for stats in &report.layers {
            writeln!(
                out,
                "{}\t{}\t{:.6}\t{:.6}\t{:.6}",
                report.sample, stats.layer, stats.total, stats.divergence, stats.diversity
            )?;
        }
    }
    out.flush()?;

    let file = File::create(output_dir.join("tree_distance.txt"))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "Sample\tRobinsonFoulds\tBranchScore")?;
    for report in reports {
        writeln!(
            out,
            "{}\t{}\t{:.6}",
            report.sample, report.rf_distance, report.branch_score
        )?;
    }
    out.flush()?;

    let file = File::create(output_dir.join("normal_distance.txt"))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "Sample\tLayer\tRegion\tDistance")?;
    for report in reports {
        for stats in &report.layers {
            for (region, distance) in &stats.normal_distances {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{:.6}",
                    report.sample, stats.layer, region, distance
                )?;
            }
        }
    }
    out.flush()?;

    Ok(())
}

pub fn run_divergence(
    args: &DivergenceArgs,
    logger: &mut crate::Logger,
) -> Result<(), Box<dyn Error>> {
    validate_divergence_args(args)?;

    let start_time = Instant::now();

    logger.log("=== ITHprofiler Divergence Function Log ===")?;
    logger.log(&format!("Software Version: v{}", crate::VERSION))?;
    logger.log(&format!(
        "Runtime: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    ))?;
    logger.log(&format!("Sample List: {}", args.samples))?;
    logger.log(&format!("Artifact Directory: {}", args.artifacts))?;
    logger.log(&format!("Output Directory: {}", args.output))?;
    logger.log(&format!("Normal Tip: {}", args.normal))?;
    logger.log("Starting divergence/diversity analysis...")?;

    let samples = read_sample_list(Path::new(&args.samples)).map_err(|e| -> Box<dyn Error> { e })?;
    std::fs::create_dir_all(&args.output)?;
    let store = ArtifactStore::new(args.artifacts.as_str());

    println!("[Loading data]");
    println!(
        "    Sample list: {} ({} samples)",
        args.samples,
        samples.len()
    );
    println!("    Artifacts: {}", args.artifacts);
    println!();
    println!("[Params]");
    println!("    Normal tip: {}.", args.normal);
    println!("    Layers: DNA, RNA, Immune.");
    println!();

    println!("[Processing] Rebuilding trees and decomposing branch lengths...");
    let mut progress = crate::progress::BatchProgress::new(samples.len());
    let mut reports = Vec::new();
    let mut failures: Vec<(String, String)> = Vec::new();
    for (i, sample) in samples.iter().enumerate() {
        progress.update(i + 1, sample)?;
        match analyze_sample(&store, sample, &args.normal) {
            Ok(report) => {
                logger.log(&format!("Sample {}: done", sample))?;
                reports.push(report);
            }
            Err(e) => {
                logger.log(&format!("Sample {}: FAILED: {}", sample, e))?;
                failures.push((sample.clone(), e.to_string()));
            }
        }
    }
    progress.finish()?;

    write_aggregates(&reports, Path::new(&args.output))?;

    let elapsed = start_time.elapsed();
    println!("[Output]");
    println!("    Decomposition: {}/ith_decomposition.txt", args.output);
    println!("    Tree distance: {}/tree_distance.txt", args.output);
    println!("    Normal distance: {}/normal_distance.txt", args.output);
    println!(
        "[Summary] {} samples analyzed, {} failed",
        reports.len(),
        failures.len()
    );
    for (sample, e) in &failures {
        println!("    {}: {}", sample, e);
    }
    println!("{}", crate::progress::format_time_used(elapsed));

    logger.log(&format!(
        "Divergence analysis completed, {} of {} samples failed",
        failures.len(),
        samples.len()
    ))?;
    logger.log(&format!("Total time: {:.2}s", elapsed.as_secs_f64()))?;

    if !failures.is_empty() && reports.is_empty() {
        return Err("Error: All samples failed".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DistanceMatrix;

    fn square(labels: &[&str], rows: &[&[f64]]) -> DistanceMatrix {
        DistanceMatrix {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            values: rows.iter().map(|r| r.to_vec()).collect(),
        }
    }

    fn base_matrix() -> DistanceMatrix {
        square(
            &["N", "T1", "T2", "T3"],
            &[
                &[0.0, 0.21, 0.17, 0.30],
                &[0.21, 0.0, 0.14, 0.25],
                &[0.17, 0.14, 0.0, 0.19],
                &[0.30, 0.25, 0.19, 0.0],
            ],
        )
    }

    fn seeded_store(dir: &Path) -> ArtifactStore {
        let store = ArtifactStore::new(dir);
        for layer in ALL_LAYERS {
            store.write_matrix(layer, "P1.txt", &base_matrix()).unwrap();
        }
        store
    }

    #[test]
    fn decomposition_invariant_per_layer() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let report = analyze_sample(&store, "P1.txt", "N").unwrap();

        assert_eq!(report.layers.len(), 3);
        for stats in &report.layers {
            assert!((stats.total - (stats.divergence + stats.diversity)).abs() < 1e-15);
            assert_eq!(stats.normal_distances.len(), 3);
            assert_eq!(stats.normal_distances[0].0, "T1");
        }
    }

    #[test]
    fn identical_layers_give_zero_tree_distance() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let report = analyze_sample(&store, "P1.txt", "N").unwrap();
        assert_eq!(report.rf_distance, 0);
        assert!(report.branch_score.abs() < 1e-12);
    }

    #[test]
    fn missing_layer_artifact_fails_the_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store
            .write_matrix(Layer::Dna, "P1.txt", &base_matrix())
            .unwrap();
        let err = analyze_sample(&store, "P1.txt", "N").unwrap_err();
        assert!(err.to_string().contains("Missing artifact"));
    }

    #[test]
    fn absent_normal_tip_fails_the_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let err = analyze_sample(&store, "P1.txt", "Normal").unwrap_err();
        assert!(err.to_string().contains("'Normal' not found"));
    }

    #[test]
    fn mismatched_dna_rna_tip_sets_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store
            .write_matrix(Layer::Dna, "P1.txt", &base_matrix())
            .unwrap();
        let renamed = square(
            &["N", "T1", "T2", "T9"],
            &[
                &[0.0, 0.21, 0.17, 0.30],
                &[0.21, 0.0, 0.14, 0.25],
                &[0.17, 0.14, 0.0, 0.19],
                &[0.30, 0.25, 0.19, 0.0],
            ],
        );
        store.write_matrix(Layer::Rna, "P1.txt", &renamed).unwrap();
        store
            .write_matrix(Layer::Immune, "P1.txt", &base_matrix())
            .unwrap();
        let err = analyze_sample(&store, "P1.txt", "N").unwrap_err();
        assert!(err.to_string().contains("Tip sets differ"));
    }

    #[test]
    fn normal_distances_match_rebuilt_tree_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let report = analyze_sample(&store, "P1.txt", "N").unwrap();

        let tree = neighbor_joining(&base_matrix()).unwrap();
        let n = tree.find_leaf("N").unwrap();
        for (region, distance) in &report.layers[0].normal_distances {
            let leaf = tree.find_leaf(region).unwrap();
            assert!((tree.path_length(n, leaf) - distance).abs() < 1e-12);
        }
    }

    #[test]
    fn aggregate_tables_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let report = analyze_sample(&store, "P1.txt", "N").unwrap();

        let out = tempfile::tempdir().unwrap();
        write_aggregates(&[report], out.path()).unwrap();

        let decomposition =
            std::fs::read_to_string(out.path().join("ith_decomposition.txt")).unwrap();
        assert!(decomposition.starts_with("Sample\tLayer\tTotal\tDivergence\tDiversity"));
        // one header plus three layer rows
        assert_eq!(decomposition.lines().count(), 4);

        let tree_distance = std::fs::read_to_string(out.path().join("tree_distance.txt")).unwrap();
        assert!(tree_distance.contains("P1.txt\t0\t0.000000"));

        let normal = std::fs::read_to_string(out.path().join("normal_distance.txt")).unwrap();
        assert!(normal.contains("P1.txt\tDNA\tT1\t"));
        assert_eq!(normal.lines().count(), 1 + 3 * 3);
    }
}
