use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Directive, EnvFilter};

/// Compact stderr logging; `RUST_LOG` overrides the default level.
pub fn setup_tracing_logger(verbose: bool) {
    fn directive_checked(directive: &str) -> Directive {
        directive.parse().expect("Failed to parse log directive")
    }

    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let mut filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    // chatty dependencies
    for crate_name in ["hyper", "redis", "tower_http", "axum"] {
        filter = filter.add_directive(directive_checked(&format!("{crate_name}=warn")));
    }

    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}
