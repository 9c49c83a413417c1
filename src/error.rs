use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SanityError {
    #[error("registry store unavailable on this platform")]
    RegistryUnavailable,

    #[error("registry access failed for {key}\\{name}: {reason}")]
    Registry {
        key: String,
        name: String,
        reason: String,
    },

    #[error("host does not support {0}")]
    MissingCapability(&'static str),

    #[error("{0}")]
    Pipeline(String),

    #[error("4GB patch installer exited with code {0:?}")]
    InstallerExit(Option<i32>),

    #[error("4GB patch installer did not finish within {0:?}")]
    InstallerTimeout(Duration),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SanityError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SanityError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        SanityError::Pipeline(message.into())
    }
}
