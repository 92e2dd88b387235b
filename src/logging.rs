use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when verbose.
/// With a log file, output is appended there instead of stderr.
pub fn init(verbose: bool, log_file: Option<&Path>) -> std::io::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(verbose);

    // A subscriber may already be installed (tests, embedding); keep the existing one
    let installed = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if let Err(err) = installed {
        debug!(error = %err, "Keeping the existing tracing subscriber");
    }

    Ok(())
}
