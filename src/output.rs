use std::io::Write;
use std::sync::Arc;

use owo_colors::OwoColorize;

use crate::progress::ProgressCallback;

/// Small wrapper around stdout/stderr printing to provide consistent, colored
/// user-facing messages. Colors are enabled only when output is a TTY.
fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

pub fn print_info(msg: &str) {
    if is_tty() {
        println!("{} {}", "info:".cyan().bold(), msg);
    } else {
        println!("info: {}", msg);
    }
}

pub fn print_warn(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "warn:".yellow().bold(), msg);
    } else {
        eprintln!("warn: {}", msg);
    }
}

pub fn print_error(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "error:".red().bold(), msg);
    } else {
        eprintln!("error: {}", msg);
    }
}

pub fn print_success(msg: &str) {
    if is_tty() {
        println!("{} {}", "ok:".green().bold(), msg);
    } else {
        println!("ok: {}", msg);
    }
}

/// Print a plain user-facing line (no prefix). Use this for primary outputs
/// such as "Copied X -> Y" which users may script against.
pub fn print_user(msg: &str) {
    println!("{}", msg);
}

/// Human-readable byte count in binary units.
pub fn format_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.1} GiB", f / GB)
    } else if f >= MB {
        format!("{:.1} MiB", f / MB)
    } else if f >= KB {
        format!("{:.1} KiB", f / KB)
    } else {
        format!("{} B", n)
    }
}

/// Progress sink for `--progress`: repaints one stderr line per event and
/// finishes it with a newline once the operation total is reached. Silent
/// when stderr is not a TTY.
pub fn progress_printer() -> ProgressCallback {
    Arc::new(|copied, total, name| {
        if !atty::is(atty::Stream::Stderr) {
            return;
        }
        let mut err = std::io::stderr();
        if total > 0 {
            let pct = copied.min(total) * 100 / total;
            let _ = write!(
                err,
                "\r\x1b[2K{:>3}% {} / {}  {}",
                pct,
                format_bytes(copied),
                format_bytes(total),
                name
            );
            if copied >= total {
                let _ = writeln!(err);
            }
        } else {
            let _ = write!(err, "\r\x1b[2K{}  {}", format_bytes(copied), name);
        }
        let _ = err.flush();
    })
}
