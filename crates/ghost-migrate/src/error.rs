//! Error types for the schema evolution library.

use thiserror::Error;

/// Main error type for versioning, planning and migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No TableRef maps the logical name at the requested version.
    #[error("Version {version} does not contain a table named '{name}'")]
    NoSuchTableRef { version: String, name: String },

    /// The catalog has no physical table with this id.
    #[error("Catalog does not contain a table with id '{0}'")]
    NoSuchTable(String),

    /// The table has no column with this name.
    #[error("Table '{table}' does not contain a column named '{column}'")]
    NoSuchColumn { table: String, column: String },

    /// The table has no foreign key constraint with this name.
    #[error("Table '{table}' does not have a foreign key named '{name}'")]
    NoSuchForeignKey { table: String, name: String },

    /// The changelog has no version with this id.
    #[error("Changelog does not contain a version with id '{0}'")]
    NoSuchVersion(String),

    /// An invariant of the schema model, ref-log or plan was violated.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The requested change cannot be planned or applied.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Executing a plan step failed.
    #[error("Migration step {step} failed: {message}")]
    Migration { step: String, message: String },

    /// State storage error
    #[error("State error: {0}")]
    State(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a TableRef lookup error.
    pub fn no_such_table_ref(version: impl Into<String>, name: impl Into<String>) -> Self {
        MigrateError::NoSuchTableRef {
            version: version.into(),
            name: name.into(),
        }
    }

    /// Create a column lookup error.
    pub fn no_such_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        MigrateError::NoSuchColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a Migration error for a failed plan step.
    pub fn migration(step: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Migration {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 1,
            MigrateError::NoSuchTableRef { .. }
            | MigrateError::NoSuchTable(_)
            | MigrateError::NoSuchColumn { .. }
            | MigrateError::NoSuchForeignKey { .. }
            | MigrateError::NoSuchVersion(_)
            | MigrateError::IllegalState(_) => 2,
            MigrateError::Unsupported(_) => 3,
            MigrateError::Migration { .. } => 4,
            MigrateError::State(_) | MigrateError::Json(_) => 5,
            MigrateError::Cancelled => 6,
            MigrateError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
