use std::path::PathBuf;
use thiserror::Error;

/// Why a file's load failed. Every variant means the file's transaction was rolled back.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The archive could not be opened or decompressed.
    #[error("cannot read archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    /// A reply/quote reference was still dangling when the transaction was about to commit.
    #[error("post {post_id} references post {referenced_id}, which is not in the store")]
    UnresolvedReference { post_id: i64, referenced_id: i64 },

    /// The store rejected the transaction on a constraint (e.g. deferred foreign key at commit).
    #[error("constraint violation: {message}")]
    Constraint { message: String },

    /// Connection, I/O or SQL failure inside the store.
    #[error("store error: {message}")]
    Store { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl LoadError {
    /// Map an error bubbling out of the pipeline onto the reportable taxonomy.
    pub fn classify(err: anyhow::Error) -> Self {
        let message = format!("{err:#}");
        let err = match err.downcast::<LoadError>() {
            Ok(e) => return e,
            Err(e) => e,
        };
        for cause in err.chain() {
            if let Some(sql) = cause.downcast_ref::<rusqlite::Error>() {
                return match sql.sqlite_error_code() {
                    Some(rusqlite::ErrorCode::ConstraintViolation) => LoadError::Constraint { message },
                    _ => LoadError::Store { message },
                };
            }
        }
        LoadError::Other { message }
    }

    /// Short machine-friendly label used in outcome reports.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Archive { .. } => "archive",
            LoadError::UnresolvedReference { .. } => "unresolved_reference",
            LoadError::Constraint { .. } => "constraint",
            LoadError::Store { .. } => "store",
            LoadError::Other { .. } => "other",
        }
    }
}
