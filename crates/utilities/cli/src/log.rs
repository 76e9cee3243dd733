//! Tracing subscriber setup.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, util::TryInitError};

/// Maps a `-v` count onto a level. No flag means `INFO`.
pub(crate) const fn verbosity_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global `fmt` subscriber.
///
/// The level comes from `verbosity`; `filter` adds directives on top, and `RUST_LOG` is honoured
/// when set.
pub fn init_tracing_subscriber(
    verbosity: u8,
    filter: Option<impl Into<EnvFilter>>,
) -> Result<(), TryInitError> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = filter.map(Into::into).unwrap_or_else(|| {
        EnvFilter::builder()
            .with_default_directive(verbosity_level(verbosity).into())
            .from_env_lossy()
    });
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, LevelFilter::INFO)]
    #[case(1, LevelFilter::DEBUG)]
    #[case(2, LevelFilter::TRACE)]
    #[case(7, LevelFilter::TRACE)]
    fn test_verbosity_level(#[case] v: u8, #[case] level: LevelFilter) {
        assert_eq!(verbosity_level(v), level);
    }
}
