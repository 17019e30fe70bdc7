use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::AppError;
use crate::matrix::DistanceMatrix;

/// Omics layer of a persisted artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Dna,
    Rna,
    Immune,
}

pub const ALL_LAYERS: [Layer; 3] = [Layer::Dna, Layer::Rna, Layer::Immune];

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Dna => "DNA",
            Layer::Rna => "RNA",
            Layer::Immune => "Immune",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Layer {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dna" => Ok(Layer::Dna),
            "rna" => Ok(Layer::Rna),
            "immune" => Ok(Layer::Immune),
            _ => Err(format!(
                "Unknown layer: {}. Supported layers: DNA, RNA, Immune",
                s
            )),
        }
    }
}

/// On-disk home for per-sample distance matrices and trees, keyed by
/// (layer, sample file name). File names follow the fixed contract
/// `{Layer}_distance_matrix_{sample}` / `{Layer}_tree_{sample}` so that
/// artifacts written by earlier runs, or by other tools honoring the same
/// contract, stay interchangeable.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn matrix_path(&self, layer: Layer, sample: &str) -> PathBuf {
        self.dir
            .join(format!("{}_distance_matrix_{}", layer, sample))
    }

    pub fn tree_path(&self, layer: Layer, sample: &str) -> PathBuf {
        self.dir.join(format!("{}_tree_{}", layer, sample))
    }

    pub fn write_matrix(
        &self,
        layer: Layer,
        sample: &str,
        matrix: &DistanceMatrix,
    ) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
        let path = self.matrix_path(layer, sample);
        matrix.write_tsv(&path)?;
        Ok(path)
    }

    pub fn write_tree(
        &self,
        layer: Layer,
        sample: &str,
        newick: &str,
    ) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
        let path = self.tree_path(layer, sample);
        fs::write(&path, format!("{}\n", newick))?;
        Ok(path)
    }

    pub fn read_matrix(
        &self,
        layer: Layer,
        sample: &str,
    ) -> Result<DistanceMatrix, Box<dyn Error + Send + Sync>> {
        let path = self.matrix_path(layer, sample);
        if !path.exists() {
            return Err(AppError::MissingArtifact(path.display().to_string()).into());
        }
        DistanceMatrix::read_tsv(&path)
    }
}

/// File name component of a sample path, used as the artifact key
pub fn sample_key(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
