use clap::Args;
use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crate::error::AppError;
use crate::matrix::{read_feature_matrix, FeatureMatrix};

#[derive(Args, Debug)]
pub struct SignatureArgs {
    /// Z-score matrix (tab-delimited, genes x samples, first column Gene)
    #[arg(short = 'z', long = "zscore")]
    pub zscore: String,
    /// Name of a bundled gene set (hypoxia, proliferation, apoptosis,
    /// drug-resistance, epithelial, mesenchymal, anti-PD1-favor)
    #[arg(short = 'g', long = "geneset")]
    pub geneset: Option<String>,
    /// Tab-delimited single-column gene list with header Gene
    #[arg(short = 'G', long = "geneset-file")]
    pub geneset_file: Option<String>,
    /// Score every bundled gene set
    #[arg(long = "all", default_value_t = false)]
    pub all: bool,
    /// Output score table
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

/// A named gene list scored against a z-score matrix
#[derive(Debug, Clone)]
pub struct GeneSet {
    pub name: String,
    pub genes: Vec<String>,
}

/// Gene sets bundled with the tool. Passed explicitly into `score_gene_set`
/// like any user-supplied list; the scorer itself has no built-in lookup.
pub fn builtin_gene_sets() -> Vec<GeneSet> {
    let sets: [(&str, &[&str]); 7] = [
        (
            "hypoxia",
            &[
                "VEGFA", "SLC2A1", "CA9", "HIF1A", "LDHA", "PGK1", "ADM", "NDRG1", "P4HA1",
                "ANGPTL4",
            ],
        ),
        (
            "proliferation",
            &[
                "MKI67", "PCNA", "TOP2A", "CCNB1", "BIRC5", "AURKA", "BUB1", "CDK1", "MCM2",
                "RRM2",
            ],
        ),
        (
            "apoptosis",
            &[
                "BAX", "BAK1", "CASP3", "CASP8", "CASP9", "TP53", "FAS", "TNFRSF10B", "BCL2L11",
                "APAF1",
            ],
        ),
        (
            "drug-resistance",
            &[
                "ABCB1", "ABCC1", "ABCG2", "GSTP1", "MGMT", "TOP1", "TUBB3", "ERCC1", "BRCA1",
                "RRM1",
            ],
        ),
        (
            "epithelial",
            &[
                "CDH1", "EPCAM", "KRT8", "KRT18", "KRT19", "CLDN4", "CLDN7", "OCLN", "DSP",
                "MUC1",
            ],
        ),
        (
            "mesenchymal",
            &[
                "VIM", "CDH2", "FN1", "ZEB1", "ZEB2", "SNAI1", "SNAI2", "TWIST1", "MMP2", "MMP9",
            ],
        ),
        (
            "anti-PD1-favor",
            &[
                "CD8A", "CD8B", "GZMA", "GZMB", "PRF1", "IFNG", "CXCL9", "CXCL10", "PDCD1",
                "CD274", "LAG3", "HAVCR2",
            ],
        ),
    ];
    sets.iter()
        .map(|(name, genes)| GeneSet {
            name: name.to_string(),
            genes: genes.iter().map(|g| g.to_string()).collect(),
        })
        .collect()
}

fn find_builtin(name: &str) -> Option<GeneSet> {
    builtin_gene_sets()
        .into_iter()
        .find(|set| set.name.eq_ignore_ascii_case(name))
}

/// Load a single-column gene list with header `Gene`
pub fn read_gene_list(path: &Path) -> Result<GeneSet, Box<dyn Error + Send + Sync>> {
    let source = path.display().to_string();
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header = lines
        .next()
        .ok_or_else(|| AppError::MalformedInput(source.clone(), "file is empty".to_string()))??;
    if header.trim() != "Gene" {
        return Err(AppError::MalformedInput(
            source,
            format!("expected header 'Gene', found '{}'", header.trim()),
        )
        .into());
    }

    let mut genes = Vec::new();
    for line in lines {
        let line = line?;
        let gene = line.trim();
        if !gene.is_empty() {
            genes.push(gene.to_string());
        }
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.clone());
    Ok(GeneSet { name, genes })
}

/// Inner-join the gene set against the matrix rows and take the column-wise
/// mean z-score over the matched rows. Genes absent from the matrix are
/// dropped; a join with no matches at all is an error.
pub fn score_gene_set(matrix: &FeatureMatrix, set: &GeneSet) -> Result<Vec<f64>, AppError> {
    let matched: Vec<usize> = matrix
        .feature_ids
        .iter()
        .enumerate()
        .filter(|(_, id)| set.genes.iter().any(|g| g == *id))
        .map(|(i, _)| i)
        .collect();
    if matched.is_empty() {
        return Err(AppError::EmptyIntersection(set.name.clone()));
    }

    let n_cols = matrix.n_cols();
    let mut means = vec![0.0; n_cols];
    for &row in &matched {
        for c in 0..n_cols {
            means[c] += matrix.values[row][c];
        }
    }
    for mean in means.iter_mut() {
        *mean /= matched.len() as f64;
    }
    Ok(means)
}

fn validate_signature_args(args: &SignatureArgs) -> Result<(), Box<dyn Error>> {
    if args.zscore.trim().is_empty() {
        return Err("Error: Z-score matrix path cannot be empty".into());
    }
    if !Path::new(&args.zscore).exists() {
        return Err(format!("Error: Z-score matrix does not exist: {}", args.zscore).into());
    }
    let selections =
        args.geneset.is_some() as usize + args.geneset_file.is_some() as usize + args.all as usize;
    if selections != 1 {
        return Err(
            "Error: Exactly one of --geneset, --geneset-file or --all must be given".into(),
        );
    }
    if args.output.trim().is_empty() {
        return Err("Error: Output file path cannot be empty".into());
    }
    Ok(())
}

pub fn score_signatures(
    args: &SignatureArgs,
    logger: &mut crate::Logger,
) -> Result<(), Box<dyn Error>> {
    validate_signature_args(args)?;

    let start_time = Instant::now();

    logger.log("=== ITHprofiler Signature Function Log ===")?;
    logger.log(&format!("Software Version: v{}", crate::VERSION))?;
    logger.log(&format!(
        "Runtime: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    ))?;
    logger.log(&format!("Z-score Matrix: {}", args.zscore))?;
    logger.log(&format!("Output File: {}", args.output))?;

    println!("[Loading data]");
    println!("    Z-score matrix: {}", args.zscore);
    println!();

    let matrix = read_feature_matrix(Path::new(&args.zscore)).map_err(|e| -> Box<dyn Error> { e })?;

    let sets: Vec<GeneSet> = if args.all {
        builtin_gene_sets()
    } else if let Some(name) = &args.geneset {
        let set = find_builtin(name)
            .ok_or_else(|| format!("Error: Unknown bundled gene set: {}", name))?;
        vec![set]
    } else {
        let path = args.geneset_file.as_ref().unwrap();
        vec![read_gene_list(Path::new(path)).map_err(|e| -> Box<dyn Error> { e })?]
    };

    println!("[Params]");
    println!("    Gene sets: {}.", sets.len());
    println!("    Samples: {}.", matrix.n_cols());
    println!();

    let file = File::create(&args.output)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "Signature\t{}", matrix.columns.join("\t"))?;
    for set in &sets {
        let scores = score_gene_set(&matrix, set)?;
        let matched = set
            .genes
            .iter()
            .filter(|g| matrix.feature_ids.contains(g))
            .count();
        logger.log(&format!(
            "Gene set '{}': {}/{} genes matched",
            set.name,
            matched,
            set.genes.len()
        ))?;
        let row: Vec<String> = scores.iter().map(|s| format!("{:.6}", s)).collect();
        writeln!(out, "{}\t{}", set.name, row.join("\t"))?;
    }
    out.flush()?;

    let elapsed = start_time.elapsed();
    println!("[Output]");
    println!("    Scores: {}", args.output);
    println!("{}", crate::progress::format_time_used(elapsed));

    logger.log(&format!(
        "Signature scoring completed, output file: {}",
        args.output
    ))?;
    logger.log(&format!("Total time: {:.2}s", elapsed.as_secs_f64()))?;

    Ok(())
}
