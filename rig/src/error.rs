//! Rig lifecycle error types
//!
//! These cover misuse of the rig itself. Worker faults are never reported
//! through `RigError`; they are captured as data (see [`crate::Fault`]).

use thiserror::Error;

/// Errors returned by rig lifecycle operations
#[derive(Debug, Error)]
pub enum RigError {
    #[error("Workers have already been started; the rig cannot be modified or restarted")]
    AlreadyStarted,

    #[error("Workers have not been started yet")]
    NotStarted,

    #[error("Invalid worker name {name:?}: thread names cannot contain NUL bytes")]
    InvalidName { name: String },

    #[error("Unknown worker id: {id}")]
    UnknownWorker { id: usize },

    #[error("Failed to spawn thread for worker '{name}'")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_names_worker() {
        let err = RigError::Spawn {
            name: "writer".to_string(),
            source: std::io::Error::other("out of threads"),
        };

        assert!(err.to_string().contains("writer"));
        let source = std::error::Error::source(&err).expect("spawn error carries its io source");
        assert!(source.to_string().contains("out of threads"));
    }

    #[test]
    fn test_invalid_name_message_escapes_nul() {
        let err = RigError::InvalidName {
            name: "bad\0name".to_string(),
        };
        assert!(err.to_string().contains("bad\\0name"));
    }

    #[test]
    fn test_unknown_worker_message() {
        let err = RigError::UnknownWorker { id: 7 };
        assert!(err.to_string().contains('7'));
    }
}
