use std::{num::NonZeroUsize, path::Path, thread};

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

// zstd refuses window logs above 31 on 64-bit targets and 30 on 32-bit ones.
#[cfg(target_pointer_width = "64")]
const MAX_WINDOW_LOG: u32 = 31;
#[cfg(not(target_pointer_width = "64"))]
const MAX_WINDOW_LOG: u32 = 30;

// zstd's own default limit; monthly dumps are written with --long=31 and need more.
const DUMP_WINDOW_LOG: u32 = 27;

pub fn setup_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub fn init_error_formatter() -> color_eyre::Result<()> {
    color_eyre::install()
}

/// Installs `ring` as the process-wide rustls provider; a second install is a no-op.
pub fn init_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        info!("A rustls crypto provider was already installed");
    }
}

pub fn checks(config: &AppConfig) {
    rayon::scope(|s| {
        s.spawn(|_| check_cpu_cores());
        s.spawn(|_| check_spool_directory(&config.spool_dir));
        s.spawn(|_| check_window_log(config.zstd_window_log_max));
    });
}

fn check_cpu_cores() {
    let cores = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);

    info!("Detected {cores} CPU cores");

    if cores < 2 {
        warn!(
            "Only {cores} CPU core detected. Each import runs on its own task and decompression \
            competes with the HTTP runtime; concurrent uploads will queue behind each other."
        );
    }
}

fn check_spool_directory(dir: &Path) {
    let probe = tempfile::Builder::new()
        .prefix("preflight-")
        .tempfile_in(dir);

    match probe {
        Ok(_) => info!("Uploads will be spooled to {}", dir.display()),
        Err(e) => warn!(
            "Cannot create files in the spool directory {}: {e}. Every import will fail \
            until SPOOL_DIR points at a writable location with room for the largest dump.",
            dir.display()
        ),
    }
}

fn check_window_log(window_log: u32) {
    if window_log > MAX_WINDOW_LOG {
        warn!(
            "ZSTD_WINDOW_LOG_MAX={window_log} exceeds what zstd supports on this target \
            ({MAX_WINDOW_LOG}); compressed uploads will fail to decompress."
        );
    } else if window_log <= DUMP_WINDOW_LOG {
        warn!(
            "ZSTD_WINDOW_LOG_MAX={window_log} is no larger than the zstd default; most Reddit \
            dumps need a larger window and will be rejected."
        );
    } else {
        info!(
            "Decompression window limit is {} MiB",
            (1u64 << window_log) >> 20
        );
    }
}
