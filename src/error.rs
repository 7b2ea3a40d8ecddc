//! The single user-facing error kind raised by subcommands.

use std::fmt::Display;

/// Error surfaced to the operator. The message already embeds whatever the
/// underlying failure reported.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    message: String,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap a lower-level failure behind a context prefix: `"{prefix}: {error}"`.
    pub fn wrap(prefix: impl Display, error: impl Display) -> Self {
        Self::new(format!("{prefix}: {error}"))
    }
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_embeds_original_message() {
        let inner = anyhow::anyhow!("connection refused");
        let err = CliError::wrap("Unable to get agent address", inner);
        assert_eq!(
            err.to_string(),
            "Unable to get agent address: connection refused"
        );
    }

    #[test]
    fn wrap_keeps_context_chain_when_alternate() {
        let inner = anyhow::anyhow!("root cause").context("outer");
        let err = CliError::wrap("prefix", format!("{inner:#}"));
        assert_eq!(err.to_string(), "prefix: outer: root cause");
    }
}
