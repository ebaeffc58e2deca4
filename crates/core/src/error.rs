/// Result alias that carries the custom [`ViewerError`] type.
pub type Result<T> = std::result::Result<T, ViewerError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    /// Free-form failure that does not fit one of the structured variants.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The configuration file could not be decoded.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// A text asset (BVH, OBJ or MTL) is malformed.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    /// Any failure while loading a resource, tagged with the resource path.
    #[error("failed to load `{path}`: {source}")]
    Load {
        path: String,
        #[source]
        source: Box<ViewerError>,
    },
    /// The load was superseded before it finished.
    #[error("load of `{0}` was cancelled")]
    Cancelled(String),
    #[error("unknown dataset `{0}`")]
    UnknownDataset(String),
    /// The session was torn down and no longer owns a scene.
    #[error("viewer session has been torn down")]
    SessionClosed,
}

impl ViewerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn parse<T: Into<String>>(line: usize, message: T) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Attaches the path of the resource that was being loaded.
    pub fn with_path(self, path: impl Into<String>) -> Self {
        match self {
            err @ (Self::Load { .. } | Self::Cancelled(_)) => err,
            other => Self::Load {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }
}

impl From<&str> for ViewerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ViewerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_errors_name_the_path_once() {
        let err = ViewerError::parse(3, "expected OFFSET")
            .with_path("bvh-data/crossover.bvh")
            .with_path("ignored");

        let text = err.to_string();
        assert!(text.contains("bvh-data/crossover.bvh"));
        assert!(text.contains("line 3"));
        assert!(!text.contains("ignored"));
    }
}
