use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed input in {0}: {1}")]
    MalformedInput(String, String),
    #[error("Neighbor joining requires at least 3 tips, found {0}")]
    InsufficientTips(usize),
    #[error("Normal tip '{0}' not found")]
    NormalTipNotFound(String),
    #[error("Tip sets differ between trees: [{0}] vs [{1}]")]
    IncompatibleTipSet(String, String),
    #[error("Gene set '{0}' shares no genes with the matrix")]
    EmptyIntersection(String),
    #[error("Missing artifact: {0}")]
    MissingArtifact(String),
}
