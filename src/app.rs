//! Application orchestrator.
//! Loads/merges config, initializes logging, installs signal handlers, and
//! dispatches the selected command to the copy engine.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

use turbocopy::config::{default_config_path, ensure_default_config_exists, load_settings_from_xml};
use turbocopy::output as out;
use turbocopy::{cancel, CopyError, Copier, TreeCopyOptions};

use crate::cli::{Args, Command};
use crate::logging::init_tracing;

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    // Handle --print-config before logging init
    if args.print_config {
        if let Ok(cfg_env) = std::env::var("TURBOCOPY_CONFIG") {
            out::print_info(&format!("Using TURBOCOPY_CONFIG (explicit):\n  {}\n", cfg_env));
            out::print_info("To override, unset TURBOCOPY_CONFIG or set it to another file.");
            return Ok(());
        }
        match default_config_path() {
            Ok(p) => {
                out::print_info(&format!("Default turbocopy config path:\n  {}\n", p.display()));
                if p.exists() {
                    out::print_info("A config file already exists at that location.");
                } else {
                    out::print_info("No config file exists there yet. It will be created on the next run.");
                }
            }
            Err(e) => {
                out::print_error(&format!("Could not determine a default config path: {e}"));
            }
        }
        return Ok(());
    }

    let Some(command) = args.command.clone() else {
        out::print_error("No command given. Run with --help for usage.");
        std::process::exit(2);
    };

    // Create template config if none exists (before logging init). Unlike the
    // config file itself, this is informational: defaults work without it.
    if let Some(path) = ensure_default_config_exists() {
        out::print_success(&format!(
            "A template turbocopy config was written to: {}",
            path.display()
        ));
        out::print_info("Edit it to change engine defaults, or set TURBOCOPY_CONFIG to use another file.");
    }

    // Build settings (may read XML). CLI args override config values.
    let mut settings = load_settings_from_xml().unwrap_or_default();
    args.apply_overrides(&mut settings);
    if args.progress {
        settings.progress_callback = Some(out::progress_printer());
    }

    // Initialize logging and capture the guard so we can drop it on signal
    let guard_opt: Option<tracing_appender::non_blocking::WorkerGuard> =
        init_tracing(&settings.log_level, settings.log_file.as_deref(), args.json).map_err(
            |e| {
                out::print_error(&format!("Failed to initialize logging: {}", e));
                e
            },
        )?;

    // Guard needs to be dropped on SIGINT to flush logs
    let guard_slot = Arc::new(Mutex::new(guard_opt));
    {
        let guard_slot = Arc::clone(&guard_slot);
        ctrlc::set_handler(move || {
            cancel::request_shutdown();
            out::print_warn("Received interrupt; shutting down gracefully...");
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take(); // drop guard here to flush tracing_appender
            }
        })
        .expect("failed to install signal handler");
    }

    if cancel::shutdown_requested() {
        return Ok(());
    }

    debug!("Starting turbocopy: {:?}", args);

    let copier = Copier::with_settings(settings);

    // Main run (so we can drop guard after)
    let result = (|| -> turbocopy::Result<()> {
        match &command {
            Command::Cp(cp) => {
                let dest = if cp.no_preserve {
                    copier.copy(&cp.src, &cp.dst)?
                } else {
                    copier.copy2(&cp.src, &cp.dst)?
                };
                info!(source = %cp.src.display(), dest = %dest.display(), "Copy completed");
                out::print_user(&format!("Copied '{}' -> '{}'", cp.src.display(), dest.display()));
            }
            Command::Tree(tree) => {
                let mut opts = TreeCopyOptions::from_settings(copier.settings());
                opts.symlinks = tree.symlinks;
                opts.ignore_dangling_symlinks = tree.ignore_dangling_symlinks;
                if tree.dirs_exist_ok {
                    opts.dirs_exist_ok = true;
                }
                copier.copytree(&tree.src, &tree.dst, &opts)?;
                info!(source = %tree.src.display(), dest = %tree.dst.display(), "Tree copy completed");
                out::print_user(&format!(
                    "Copied tree '{}' -> '{}'",
                    tree.src.display(),
                    tree.dst.display()
                ));
            }
            Command::Remote(remote) => {
                let level = remote
                    .compression
                    .unwrap_or(copier.settings().compression_level);
                let dest =
                    copier.copy_with_server(&remote.src, &remote.dst, &remote.server, remote.port, level)?;
                info!(source = %remote.src.display(), dest = %dest.display(), server = %remote.server, "Remote copy completed");
                out::print_user(&format!(
                    "Copied '{}' -> '{}'",
                    remote.src.display(),
                    dest.display()
                ));
            }
            Command::Delta(delta) => {
                let dest = copier.delta_copy(&delta.src, &delta.dst, &delta.reference)?;
                info!(source = %delta.src.display(), dest = %dest.display(), reference = %delta.reference.display(), "Delta copy completed");
                out::print_user(&format!(
                    "Copied '{}' -> '{}'",
                    delta.src.display(),
                    dest.display()
                ));
            }
            Command::Serve(serve) => {
                let mut server = copier.create_server(serve.port, serve.threads);
                server.start()?;
                out::print_info(&format!(
                    "Serving on port {} with up to {} sessions. Press Ctrl-C to stop.",
                    server.port(),
                    server.thread_count()
                ));
                while server.is_running() && !cancel::shutdown_requested() {
                    std::thread::sleep(Duration::from_millis(100));
                }
                server.stop();
                let stats = server.stats();
                info!(
                    connections = stats.connections,
                    files_served = stats.files_served,
                    bytes_served = stats.bytes_served,
                    files_received = stats.files_received,
                    bytes_received = stats.bytes_received,
                    uptime_secs = stats.uptime.as_secs(),
                    "Server stopped"
                );
                out::print_user(&format!(
                    "Served {} in {} files, received {} in {} files over {} connections",
                    out::format_bytes(stats.bytes_served),
                    stats.files_served,
                    out::format_bytes(stats.bytes_received),
                    stats.files_received,
                    stats.connections
                ));
            }
        }
        Ok(())
    })();

    // Ensure logs are flushed before exit
    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }

    if let Err(e) = &result {
        log_copy_error(e);
    }
    result.map_err(anyhow::Error::from)
}

/// Structured per-variant failure logging; the human-readable line comes from
/// the error's Display via main.
fn log_copy_error(e: &CopyError) {
    let code = e.code();
    match e {
        CopyError::Path { path, reason } => {
            error!(code, kind = "path", path = %path.display(), %reason, "Copy failed")
        }
        CopyError::SourceNotFound(path) => {
            error!(code, kind = "source_not_found", path = %path.display(), "Copy failed")
        }
        CopyError::SourceIsDirectory(path) => {
            error!(code, kind = "source_is_directory", path = %path.display(), "Copy failed")
        }
        CopyError::SourceNotADirectory(path) => {
            error!(code, kind = "source_not_a_directory", path = %path.display(), "Copy failed")
        }
        CopyError::DestinationExists(path) => {
            error!(code, kind = "destination_exists", path = %path.display(), "Copy failed")
        }
        CopyError::DestinationNotADirectory(path) => {
            error!(code, kind = "destination_not_a_directory", path = %path.display(), "Copy failed")
        }
        CopyError::PermissionDenied { path, context } => {
            error!(code, kind = "permission_denied", path = %path.display(), %context, "Copy failed")
        }
        CopyError::CopyFailed { src, dst, source } => {
            error!(code, kind = "copy_failed", src = %src.display(), dst = %dst.display(), cause = %source, "Copy failed")
        }
        CopyError::DeltaCopy(msg) => {
            error!(code, kind = "delta_copy", %msg, "Copy failed")
        }
        CopyError::Network { addr, source } => {
            error!(code, kind = "network", %addr, error = %source, "Copy failed")
        }
        CopyError::Timeout(t) => {
            error!(code, kind = "timeout", timeout_ms = t.as_millis() as u64, "Copy failed")
        }
        CopyError::Server(msg) => {
            error!(code, kind = "server", %msg, "Copy failed")
        }
        CopyError::Client(msg) => {
            error!(code, kind = "client", %msg, "Copy failed")
        }
        CopyError::Configuration(msg) => {
            error!(code, kind = "configuration", %msg, "Copy failed")
        }
        CopyError::Unsupported(msg) => {
            error!(code, kind = "unsupported", %msg, "Copy failed")
        }
        CopyError::Cancelled => {
            error!(code, kind = "cancelled", "Copy aborted by user")
        }
        CopyError::Io(err) => {
            error!(code, kind = "io", error = %err, "Copy failed")
        }
        CopyError::Unknown(msg) => {
            error!(code, kind = "unknown", %msg, "Copy failed")
        }
    }
}
