//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.state.path.trim().is_empty() {
        return Err(MigrateError::Config("state.path is required".into()));
    }

    if config.planner.max_expansions == 0 {
        return Err(MigrateError::Config(
            "planner.max_expansions must be at least 1".into(),
        ));
    }

    // Only check if explicitly set
    if let Some(0) = config.execution.workers {
        return Err(MigrateError::Config(
            "execution.workers must be at least 1".into(),
        ));
    }

    Ok(())
}
