//! Tracing subscriber installation.

use std::env;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "NETFLEET_LOG";

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Raised when a filter directive cannot be parsed.
    #[error("invalid log directive `{directive}`: {message}")]
    InvalidDirective {
        /// Directive as supplied.
        directive: String,
        /// Parser message.
        message: String,
    },
    /// Raised when a global subscriber is already installed.
    #[error("tracing subscriber already installed: {message}")]
    AlreadyInstalled {
        /// Message from the subscriber registry.
        message: String,
    },
}

/// Builds the filter from [`LOG_ENV`], falling back to `default_directive`
/// when the variable is unset or blank.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidDirective`] when the chosen directive
/// does not parse.
pub fn env_filter(default_directive: &str) -> Result<EnvFilter, TelemetryError> {
    let directive = env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_directive.to_owned());
    EnvFilter::try_new(&directive).map_err(|err| TelemetryError::InvalidDirective {
        message: err.to_string(),
        directive,
    })
}

/// Installs a formatted subscriber filtered by [`env_filter`].
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidDirective`] for an unparsable filter
/// and [`TelemetryError::AlreadyInstalled`] when called twice.
pub fn init_tracing(default_directive: &str) -> Result<(), TelemetryError> {
    let filter = env_filter(default_directive)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| TelemetryError::AlreadyInstalled {
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support::EnvGuard;

    #[rstest]
    #[tokio::test]
    async fn env_overrides_the_default_directive() {
        let _guard = EnvGuard::isolated(&[(LOG_ENV, "netfleet=debug")]).await;

        let filter = env_filter("warn").expect("filter");

        assert_eq!(filter.to_string(), "netfleet=debug");
    }

    #[rstest]
    #[tokio::test]
    async fn blank_env_falls_back_to_the_default() {
        let _guard = EnvGuard::isolated(&[(LOG_ENV, " ")]).await;

        let filter = env_filter("info").expect("filter");

        assert_eq!(filter.to_string(), "info");
    }

    #[rstest]
    #[tokio::test]
    async fn unparsable_directives_are_reported() {
        let _guard = EnvGuard::isolated(&[(LOG_ENV, "netfleet=loud")]).await;

        let err = env_filter("info").expect_err("invalid directive");

        assert!(matches!(
            err,
            TelemetryError::InvalidDirective { ref directive, .. } if directive == "netfleet=loud"
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn installing_twice_is_an_error_not_a_panic() {
        let _guard = EnvGuard::isolated(&[(LOG_ENV, "off")]).await;
        let _first = init_tracing("off");

        let second = init_tracing("off");

        assert!(matches!(
            second,
            Err(TelemetryError::AlreadyInstalled { .. })
        ));
    }
}
