use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Required input file {path} does not exist")]
    MissingInputFile { path: PathBuf },
    #[error("Shape mismatch in {stage}: {detail}")]
    ShapeMismatch {
        stage: &'static str,
        detail: String,
    },
}

impl ModelError {
    pub(crate) fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::MissingInputFile { path: path.into() }
    }

    pub(crate) fn shape_mismatch(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            stage,
            detail: detail.into(),
        }
    }
}
