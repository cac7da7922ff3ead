// When 'lib.rs' exists, cargo treats 'main.rs' as a separate crate
use arbor_cli::analyze;
use arbor_cli::cli::Config;
use arbor_common::file_cache::FileCache;
use arbor_common::report_error::Reportable;
use tracing_subscriber::EnvFilter;

use std::io;

fn main() {
    better_panic::install();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ARBOR_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = Config::from_args();
    let mut files = FileCache::new();
    let result = analyze(&config, &mut files, &mut io::stdout().lock());
    if let Err(err) = result {
        let _ = err.report(&mut io::stderr().lock(), &files);
        std::process::exit(err.exit_status());
    }
}
