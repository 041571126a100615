pub mod formats;

use flexi_logger::{FlexiLoggerError, Logger, LoggerHandle};

/// Spec used when `RUST_LOG` is unset.
fn default_spec(verbose: bool) -> &'static str {
    if verbose {
        "debug,sqlx=warn"
    } else {
        "info,sqlx=warn"
    }
}

/// Start logging to stderr, keeping stdout for command output.
///
/// `RUST_LOG` wins over `verbose`. Keep the handle alive for the whole run.
pub fn init(verbose: bool) -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_env_or_str(default_spec(verbose))?
        .format(formats::cli_format)
        .log_to_stderr()
        .start()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_default_level() {
        assert!(default_spec(true).starts_with("debug"));
        assert!(default_spec(false).starts_with("info"));
    }
}
