// src/logging.rs
//
// Gateway logging: timestamped lines on stderr, optionally mirrored into
// a `km271-gateway.log` file that appends across restarts. The gateway is
// a long-running daemon, so one stable file the operator can tail beats
// per-run log files.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

static MIRROR: Mutex<Option<File>> = Mutex::new(None);

/// Timestamped logging macro: `tlog!("[mqtt] connected to {}", host)`.
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::logging::write_line(format_args!($($arg)*))
    };
}

/// Emit one line, prefixed with `HH:MM:SS.mmm` local time, to stderr and
/// to the mirror file when one is open.
pub(crate) fn write_line(args: fmt::Arguments<'_>) {
    let line = format!(
        "{} {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        args
    );
    eprintln!("{}", line);
    if let Ok(mut mirror) = MIRROR.lock() {
        if let Some(file) = mirror.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Start mirroring log lines into `<dir>/km271-gateway.log`.
/// A file that cannot be opened is reported and logging stays on stderr.
pub(crate) fn mirror_to_dir(dir: &Path) {
    let path = dir.join("km271-gateway.log");
    let opened = std::fs::create_dir_all(dir)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
    match opened {
        Ok(file) => {
            if let Ok(mut mirror) = MIRROR.lock() {
                *mirror = Some(file);
            }
            tlog!("[logging] mirroring to {}", path.display());
        }
        Err(e) => tlog!("[logging] cannot open {}: {}", path.display(), e),
    }
}

/// Close the mirror file; subsequent lines go to stderr only.
pub(crate) fn close_mirror() {
    let closed = MIRROR.lock().ok().and_then(|mut mirror| mirror.take());
    if closed.is_some() {
        tlog!("[logging] mirror closed");
    }
}
