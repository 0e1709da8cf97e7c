//! Error types for the CIFAR10 trainer.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Failed to decode image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Operand shapes that do not line up for `op`.
    #[error("Shape mismatch in {op}: {lhs:?} vs {rhs:?}")]
    Shape {
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },

    #[error("{0}: backward called before forward")]
    BackwardBeforeForward(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Non-finite value encountered: {0}")]
    NonFinite(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_display() {
        let err = Error::Shape {
            op: "matmul",
            lhs: (2, 3),
            rhs: (4, 5),
        };
        assert_eq!(format!("{}", err), "Shape mismatch in matmul: (2, 3) vs (4, 5)");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
