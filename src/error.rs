//! Error types for routing operations

use thiserror::Error;

use crate::config::Role;

/// Result type for routing operations
pub type RouteResult<T> = Result<T, RouteError>;

/// Errors that can occur while routing commands to Redis
#[derive(Error, Debug)]
pub enum RouteError {
    /// No topology was ever registered for the instance/role pair.
    ///
    /// This is a usage error, not a transient fault: it means the
    /// configuration source never delivered a descriptor for this role.
    /// It is never retried here.
    #[error("no topology registered for instance '{instance}' ({role})")]
    ConfigurationAbsent { instance: String, role: Role },

    /// Pool creation or connection acquire failed
    #[error("connection pool unavailable for '{target}': {reason}")]
    PoolUnavailable { target: String, reason: String },

    /// The remote command itself failed; surfaced verbatim after the
    /// connection is released
    #[error("command failed: {0}")]
    Command(#[from] redis::RedisError),

    /// A cursor scan failed mid-loop; no partial result is returned
    #[error("scan aborted: {0}")]
    ScanAborted(String),

    /// A topology document from the configuration source did not parse
    #[error("invalid topology document for instance '{instance}': {reason}")]
    InvalidTopology { instance: String, reason: String },
}

impl RouteError {
    /// True if the error indicates missing configuration rather than a
    /// runtime fault
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RouteError::ConfigurationAbsent { .. } | RouteError::InvalidTopology { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_absent_names_instance_and_role() {
        let err = RouteError::ConfigurationAbsent {
            instance: "Orders".to_string(),
            role: Role::Read,
        };
        let rendered = err.to_string();
        assert!(rendered.contains("Orders"));
        assert!(rendered.contains("slave"));
        assert!(err.is_configuration());
    }

    #[test]
    fn command_error_wraps_redis_error() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::TypeError, "bad reply"));
        let err = RouteError::from(redis_err);
        assert!(matches!(err, RouteError::Command(_)));
        assert!(!err.is_configuration());
    }
}
