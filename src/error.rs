//! Error taxonomy shared by every stage of the TT-to-FT pipeline.

use {std::path::PathBuf, thiserror::Error};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Physical or numerical parameters that cannot describe a valid run
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Missing or insufficient simulation output
    #[error("data unavailable: {0}")]
    DataAvailability(String),

    /// The Newton iteration did not reach its tolerance
    #[error("no convergence after {iterations} iterations (perturbation norm {norm:e}): {reason}")]
    Convergence {
        iterations: usize,
        norm: f64,
        reason: String,
    },

    /// Field, profile and grid shapes that do not line up
    #[error("layout mismatch: {0}")]
    Layout(String),

    /// A failure reported by the coordinating rank
    #[error("coordinator failed: {0}")]
    Remote(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to write YAML to {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("message passing failed: {0}")]
    Communication(String),
}

impl Error {
    pub(crate) fn io<P: Into<PathBuf>>(path: P) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::Io { path, source }
    }

    pub(crate) fn decode<P: Into<PathBuf>>(path: P) -> impl FnOnce(bincode::Error) -> Self {
        let path = path.into();
        move |source| Error::Decode { path, source }
    }

    pub(crate) fn encode<P: Into<PathBuf>>(path: P) -> impl FnOnce(bincode::Error) -> Self {
        let path = path.into();
        move |source| Error::Encode { path, source }
    }

    pub(crate) fn yaml<P: Into<PathBuf>>(path: P) -> impl FnOnce(serde_yaml::Error) -> Self {
        let path = path.into();
        move |source| Error::Yaml { path, source }
    }
}
