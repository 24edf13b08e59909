use indicatif::ProgressStyle;

const STYLE_RUN: &str = "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";
const STYLE_TASK: &str = "{spinner:.blue} {msg} [{elapsed}]";

/// Progress bar of a whole run.
pub(crate) fn get_style_run() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(STYLE_RUN)
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Spinner of a single running task, without progress.
pub(crate) fn get_style_task() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(STYLE_TASK)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Installs a global subscriber printing log events to stderr, with progress
/// bars for running tasks. The filter is read from `RUST_LOG` and defaults to
/// `nagare=info`.
///
/// Does nothing if a global subscriber is already installed.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif = IndicatifLayer::new();

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "nagare=info".into()))
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_styles_build() {
        // templates are static, a broken one would silently fall back
        assert!(ProgressStyle::default_bar().template(STYLE_RUN).is_ok());
        assert!(ProgressStyle::default_spinner().template(STYLE_TASK).is_ok());
        let _ = (get_style_run(), get_style_task());
    }
}
