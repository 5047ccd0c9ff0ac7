//! Transfer client.
//! Pulls files and trees from a transfer server over the block protocol.
//! When the destination already holds an older version of a file the client
//! ships a signature and asks for a delta instead of the full payload.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cancel::{self, CancelToken};
use crate::config::{CopySettings, ErrorStrategy, MAX_COMPRESSION_LEVEL};
use crate::errors::{CopyError, Result};
use crate::fs_ops::copy_file::{self, MetadataFidelity};
use crate::fs_ops::normalize::normalize;
use crate::fs_ops::tree;
use crate::net::delta;
use crate::net::protocol::{
    self, IO_TIMEOUT, Opcode, RemoteEntry, RemoteEntryKind, TRANSFER_BLOCK,
};
use crate::progress::Reporter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Protocol failures the client detects in the peer's stream are `Client`
/// errors; failures the server reports in a status reply are `Server`.
fn classify_io(addr: &str, e: io::Error) -> CopyError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => CopyError::Timeout(IO_TIMEOUT),
        io::ErrorKind::InvalidData => CopyError::Client(e.to_string()),
        _ => CopyError::Network {
            addr: addr.to_string(),
            source: e,
        },
    }
}

fn try_connect(addr: &str) -> io::Result<TcpStream> {
    let mut last_err = None;
    for sock in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")))
}

/// One connection to a transfer server. Counters are monotone for the life
/// of the session.
pub(crate) struct TransferSession {
    stream: TcpStream,
    addr: String,
    level: u32,
    bytes_transferred: u64,
}

impl TransferSession {
    /// Connect and handshake, retrying the connect `retry_count` times.
    pub(crate) fn connect(
        server_addr: &str,
        port: u16,
        level: u32,
        settings: &CopySettings,
    ) -> Result<Self> {
        let addr = format!("{server_addr}:{port}");
        let mut attempt = 0u32;
        let mut stream = loop {
            match try_connect(&addr) {
                Ok(stream) => break stream,
                Err(e) if attempt < settings.retry_count => {
                    attempt += 1;
                    warn!(error = %e, %addr, attempt, "Connect failed, retrying");
                    thread::sleep(settings.retry_delay);
                }
                Err(source) => return Err(CopyError::Network { addr, source }),
            }
        };
        stream
            .set_read_timeout(Some(IO_TIMEOUT))
            .and_then(|()| stream.set_write_timeout(Some(IO_TIMEOUT)))
            .map_err(|source| CopyError::Network {
                addr: addr.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        let accepted = protocol::client_handshake(&mut stream, level)
            .map_err(|e| classify_io(&addr, e))?;
        debug!(%addr, requested = level, accepted, "Connected to transfer server");
        Ok(Self {
            stream,
            addr,
            level: accepted,
            bytes_transferred: 0,
        })
    }

    pub(crate) fn level(&self) -> u32 {
        self.level
    }

    pub(crate) fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    fn classify(&self, e: io::Error) -> CopyError {
        classify_io(&self.addr, e)
    }

    fn read_status(&mut self) -> Result<()> {
        match protocol::read_status(&mut self.stream).map_err(|e| self.classify(e))? {
            Ok(()) => Ok(()),
            Err(msg) => Err(CopyError::Server(msg)),
        }
    }

    /// List a remote directory. A `Server` error usually means the path is
    /// not a directory there.
    pub(crate) fn list_dir(&mut self, remote: &Path) -> Result<Vec<RemoteEntry>> {
        protocol::write_opcode(&mut self.stream, Opcode::List)
            .and_then(|()| protocol::write_path(&mut self.stream, remote))
            .map_err(|e| self.classify(e))?;
        self.read_status()?;
        protocol::read_entries(&mut self.stream).map_err(|e| self.classify(e))
    }

    /// Pull one remote file into `dst`, overwriting it. Returns bytes
    /// received.
    pub(crate) fn fetch_file(
        &mut self,
        remote: &Path,
        dst: &Path,
        preserve: bool,
        reporter: Option<&Reporter>,
        cancel: Option<&CancelToken>,
    ) -> Result<u64> {
        cancel::check(cancel)?;
        protocol::write_opcode(&mut self.stream, Opcode::ReadFile)
            .and_then(|()| protocol::write_path(&mut self.stream, remote))
            .map_err(|e| self.classify(e))?;
        self.read_status()?;
        let (size, mtime) = self.read_size_and_mtime()?;

        if let Some(rep) = reporter {
            rep.add_total(size);
            rep.file_started(dst);
        }
        create_parent(dst)?;
        let file = fs::File::create(dst).map_err(|e| CopyError::from_io(e, dst))?;
        let mut writer = BufWriter::with_capacity(TRANSFER_BLOCK, file);

        let mut cancelled = false;
        let received = protocol::recv_stream(&mut self.stream, &mut writer, |n| {
            if cancel::check(cancel).is_err() {
                cancelled = true;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            if let Some(rep) = reporter {
                rep.advance(n, dst);
            }
            Ok(())
        });
        if cancelled {
            return Err(CopyError::Cancelled);
        }
        let received = received.map_err(|e| self.classify(e))?;
        writer.flush().map_err(|e| CopyError::from_io(e, dst))?;
        drop(writer);

        if received != size {
            return Err(CopyError::CopyFailed {
                src: remote.to_path_buf(),
                dst: dst.to_path_buf(),
                source: Box::new(CopyError::Unknown(format!(
                    "size mismatch: received {received} of {size} bytes"
                ))),
            });
        }
        if preserve {
            set_mtime(dst, mtime);
        }
        if let Some(rep) = reporter {
            rep.file_done(dst);
        }
        self.bytes_transferred += received;
        debug!(remote = %remote.display(), dst = %dst.display(), bytes = received, "Fetched file");
        Ok(received)
    }

    /// Ask the server for a delta of `remote` against the current content of
    /// `dst`. Returns `None` when the server advises a full transfer.
    pub(crate) fn fetch_delta(
        &mut self,
        remote: &Path,
        dst: &Path,
        preserve: bool,
        reporter: Option<&Reporter>,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<u64>> {
        cancel::check(cancel)?;
        let reference = fs::read(dst).map_err(|e| CopyError::from_io(e, dst))?;
        let block_size = delta::block_size_for_len(reference.len() as u64);
        let signature = delta::compute_signature(&reference, block_size);

        protocol::write_opcode(&mut self.stream, Opcode::ReadDelta)
            .and_then(|()| protocol::write_path(&mut self.stream, remote))
            .and_then(|()| protocol::write_signature(&mut self.stream, &signature))
            .map_err(|e| self.classify(e))?;
        self.read_status()?;
        let worthwhile = protocol::read_varint(&mut self.stream).map_err(|e| self.classify(e))?;
        if worthwhile == 0 {
            debug!(remote = %remote.display(), "Server advised a full transfer");
            return Ok(None);
        }
        let (size, mtime) = self.read_size_and_mtime()?;

        let mut ops = Vec::new();
        loop {
            cancel::check(cancel)?;
            match protocol::read_delta_op(&mut self.stream).map_err(|e| self.classify(e))? {
                Some(op) => ops.push(op),
                None => break,
            }
        }
        let rebuilt = delta::apply_delta(&reference, block_size, &ops)?;
        if rebuilt.len() as u64 != size {
            return Err(CopyError::DeltaCopy(format!(
                "reconstructed {} bytes for {}, expected {size}",
                rebuilt.len(),
                dst.display()
            )));
        }

        if let Some(rep) = reporter {
            rep.add_total(size);
            rep.file_started(dst);
        }
        fs::write(dst, &rebuilt).map_err(|e| CopyError::from_io(e, dst))?;
        if preserve {
            set_mtime(dst, mtime);
        }
        if let Some(rep) = reporter {
            rep.advance(size, dst);
            rep.file_done(dst);
        }
        self.bytes_transferred += size;
        debug!(
            remote = %remote.display(),
            dst = %dst.display(),
            ops = ops.len(),
            bytes = size,
            "Applied delta"
        );
        Ok(Some(size))
    }

    /// End the session cleanly.
    pub(crate) fn finish(&mut self) -> Result<()> {
        protocol::write_opcode(&mut self.stream, Opcode::Done).map_err(|e| self.classify(e))?;
        self.read_status()
    }

    fn read_size_and_mtime(&mut self) -> Result<(u64, u64)> {
        let size = protocol::read_varint(&mut self.stream).map_err(|e| self.classify(e))?;
        let mtime = protocol::read_varint(&mut self.stream).map_err(|e| self.classify(e))?;
        Ok((size, mtime))
    }
}

fn create_parent(dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| CopyError::from_io(e, parent))?;
        }
    }
    Ok(())
}

fn set_mtime(path: &Path, mtime_secs: u64) {
    let t = filetime::FileTime::from_unix_time(mtime_secs as i64, 0);
    if let Err(e) = filetime::set_file_mtime(path, t) {
        warn!(error = %e, path = %path.display(), "Failed to set modification time");
    }
}

/// Copy `src` to `dst` through a transfer server, degrading to a plain local
/// copy when the server cannot be reached. `src` is interpreted on the
/// server side; `dst` is local.
pub(crate) fn copy_with_server(
    src: &Path,
    dst: &Path,
    server_addr: &str,
    port: u16,
    compression_level: u32,
    settings: &CopySettings,
    reporter: Option<&Reporter>,
    cancel: Option<&CancelToken>,
) -> Result<PathBuf> {
    cancel::check(cancel)?;
    let level = compression_level.min(MAX_COMPRESSION_LEVEL);

    let mut session = match TransferSession::connect(server_addr, port, level, settings) {
        Ok(session) => session,
        Err(e) => {
            let cause = CopyError::Server(format!(
                "transfer server {server_addr}:{port} unavailable: {e}"
            ));
            warn!(code = cause.code(), error = %cause, "Falling back to a local copy");
            return local_fallback(src, dst, settings, reporter, cancel);
        }
    };

    // One probe decides file vs directory on the server side.
    match session.list_dir(src) {
        Ok(entries) => {
            let dst_root = normalize(dst)?;
            pull_tree(
                &mut session,
                src,
                &dst_root,
                entries,
                settings,
                reporter,
                cancel,
            )?;
            session.finish()?;
            info!(
                src = %src.display(),
                dst = %dst_root.display(),
                bytes = session.bytes_transferred(),
                "Remote tree copy complete"
            );
            Ok(dst_root)
        }
        Err(CopyError::Server(_)) => {
            let final_dst = pull_file(&mut session, src, dst, settings, reporter, cancel)?;
            session.finish()?;
            info!(
                src = %src.display(),
                dst = %final_dst.display(),
                bytes = session.bytes_transferred(),
                "Remote copy complete"
            );
            Ok(final_dst)
        }
        Err(e) => Err(e),
    }
}

fn pull_file(
    session: &mut TransferSession,
    remote_src: &Path,
    dst: &Path,
    settings: &CopySettings,
    reporter: Option<&Reporter>,
    cancel: Option<&CancelToken>,
) -> Result<PathBuf> {
    let dst = normalize(dst)?;
    let final_dst = if dst.is_dir() {
        match remote_src.file_name() {
            Some(name) => dst.join(name),
            None => {
                return Err(CopyError::Path {
                    path: remote_src.to_path_buf(),
                    reason: "source has no file name to append to the destination directory"
                        .to_string(),
                });
            }
        }
    } else {
        dst
    };

    if final_dst.is_file() {
        match session.fetch_delta(
            remote_src,
            &final_dst,
            settings.preserve_metadata,
            reporter,
            cancel,
        )? {
            Some(_) => return Ok(final_dst),
            None => {}
        }
    }
    session.fetch_file(
        remote_src,
        &final_dst,
        settings.preserve_metadata,
        reporter,
        cancel,
    )?;
    Ok(final_dst)
}

fn pull_tree(
    session: &mut TransferSession,
    remote: &Path,
    local: &Path,
    entries: Vec<RemoteEntry>,
    settings: &CopySettings,
    reporter: Option<&Reporter>,
    cancel: Option<&CancelToken>,
) -> Result<()> {
    cancel::check(cancel)?;
    match fs::metadata(local) {
        Ok(meta) if !meta.is_dir() => {
            return Err(CopyError::DestinationNotADirectory(local.to_path_buf()));
        }
        Ok(_) if !settings.dirs_exist_ok => {
            return Err(CopyError::DestinationExists(local.to_path_buf()));
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(local).map_err(|e| CopyError::from_io(e, local))?;
        }
        Err(e) => return Err(CopyError::from_io(e, local)),
    }

    for entry in entries {
        cancel::check(cancel)?;
        let remote_child = remote.join(&entry.name);
        let local_child = local.join(&entry.name);
        let outcome = match entry.kind {
            RemoteEntryKind::Dir => {
                let children = session.list_dir(&remote_child)?;
                pull_tree(
                    session, &remote_child, &local_child, children, settings, reporter, cancel,
                )
            }
            RemoteEntryKind::File => session
                .fetch_file(
                    &remote_child,
                    &local_child,
                    settings.preserve_metadata,
                    reporter,
                    cancel,
                )
                .map(|_| ()),
            RemoteEntryKind::Symlink => {
                debug!(path = %remote_child.display(), "Skipping remote symlink");
                Ok(())
            }
        };
        match outcome {
            Ok(()) => {}
            // A server-reported failure leaves the session synchronized, so
            // the ignore strategy can skip the entry and move on. Transport
            // failures cannot be skipped.
            Err(CopyError::Server(msg))
                if settings.error_strategy == ErrorStrategy::Ignore =>
            {
                warn!(path = %remote_child.display(), error = %msg, "Skipping failed entry");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn local_fallback(
    src: &Path,
    dst: &Path,
    settings: &CopySettings,
    reporter: Option<&Reporter>,
    cancel: Option<&CancelToken>,
) -> Result<PathBuf> {
    let meta = fs::metadata(src).map_err(|e| CopyError::from_io(e, src))?;
    if meta.is_dir() {
        let opts = tree::TreeCopyOptions::from_settings(settings);
        tree::copy_tree(src, dst, &opts, settings, reporter, cancel)?;
        normalize(dst)
    } else {
        let fidelity = if settings.preserve_metadata {
            MetadataFidelity::Full
        } else {
            MetadataFidelity::ContentOnly
        };
        if let Some(rep) = reporter {
            rep.add_total(meta.len());
        }
        copy_file::copy_one(src, dst, fidelity, true, settings, reporter, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::server::Server;
    use serial_test::serial;
    use tempfile::tempdir;

    fn started_server() -> Server {
        let mut server = Server::new(0, 2);
        server.start().unwrap();
        server
    }

    #[test]
    #[serial(shutdown)]
    fn pulls_a_file_end_to_end() {
        cancel::reset_shutdown();
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let body: Vec<u8> = (0..80_000u32).map(|i| (i % 253) as u8).collect();
        fs::write(&src, &body).unwrap();
        let dst = dir.path().join("out/dst.bin");

        let server = started_server();
        let settings = CopySettings::default();
        let got = copy_with_server(&src, &dst, "127.0.0.1", server.port(), 6, &settings, None, None)
            .unwrap();
        assert_eq!(got, normalize(&dst).unwrap());
        assert_eq!(fs::read(&dst).unwrap(), body);
    }

    #[test]
    #[serial(shutdown)]
    fn appends_basename_when_destination_is_a_directory() {
        cancel::reset_shutdown();
        let dir = tempdir().unwrap();
        let src = dir.path().join("report.txt");
        fs::write(&src, b"quarterly").unwrap();
        let dst_dir = dir.path().join("inbox");
        fs::create_dir(&dst_dir).unwrap();

        let server = started_server();
        let settings = CopySettings::default();
        let got = copy_with_server(
            &src,
            &dst_dir,
            "127.0.0.1",
            server.port(),
            0,
            &settings,
            None,
            None,
        )
        .unwrap();
        assert!(got.ends_with("report.txt"));
        assert_eq!(fs::read(dst_dir.join("report.txt")).unwrap(), b"quarterly");
    }

    #[test]
    #[serial(shutdown)]
    fn updates_an_existing_destination_via_delta() {
        cancel::reset_shutdown();
        let dir = tempdir().unwrap();
        let src = dir.path().join("db.bin");
        let mut body: Vec<u8> = (0..120_000u32).map(|i| (i % 239) as u8).collect();
        fs::write(&src, &body).unwrap();

        // Destination holds a slightly stale version.
        let dst = dir.path().join("replica.bin");
        body[777] ^= 0x55;
        fs::write(&dst, &body).unwrap();

        let server = started_server();
        let settings = CopySettings::default();
        copy_with_server(&src, &dst, "127.0.0.1", server.port(), 4, &settings, None, None)
            .unwrap();
        assert_eq!(fs::read(&dst).unwrap(), fs::read(&src).unwrap());
        // Only the changed region travelled as literal bytes.
        assert!(server.stats().bytes_served < 120_000 / 2);
    }

    #[test]
    #[serial(shutdown)]
    fn pulls_a_tree_recursively() {
        cancel::reset_shutdown();
        let dir = tempdir().unwrap();
        let src = dir.path().join("site");
        fs::create_dir_all(src.join("assets/img")).unwrap();
        fs::write(src.join("index.html"), b"<html>").unwrap();
        fs::write(src.join("assets/app.js"), b"let x = 1;").unwrap();
        fs::write(src.join("assets/img/logo.png"), vec![9u8; 4096]).unwrap();
        let dst = dir.path().join("mirror");

        let server = started_server();
        let settings = CopySettings::default();
        copy_with_server(&src, &dst, "127.0.0.1", server.port(), 9, &settings, None, None)
            .unwrap();
        assert_eq!(fs::read(dst.join("index.html")).unwrap(), b"<html>");
        assert_eq!(fs::read(dst.join("assets/app.js")).unwrap(), b"let x = 1;");
        assert_eq!(
            fs::read(dst.join("assets/img/logo.png")).unwrap(),
            vec![9u8; 4096]
        );
    }

    #[test]
    #[serial(shutdown)]
    fn falls_back_to_local_copy_when_no_server_listens() {
        cancel::reset_shutdown();
        let dir = tempdir().unwrap();
        let src = dir.path().join("local.txt");
        fs::write(&src, b"still works").unwrap();
        let dst = dir.path().join("copy.txt");

        // Grab a port with no listener behind it.
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let settings = CopySettings::default().with_retry_count(0);
        let got =
            copy_with_server(&src, &dst, "127.0.0.1", port, 3, &settings, None, None).unwrap();
        assert_eq!(fs::read(&got).unwrap(), b"still works");
    }

    #[test]
    #[serial(shutdown)]
    fn missing_remote_file_is_a_server_error() {
        cancel::reset_shutdown();
        let dir = tempdir().unwrap();
        let server = started_server();
        let settings = CopySettings::default();
        let err = copy_with_server(
            &dir.path().join("ghost.txt"),
            &dir.path().join("dst.txt"),
            "127.0.0.1",
            server.port(),
            0,
            &settings,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CopyError::Server(_)));
        assert!(err.to_string().contains("ghost.txt"));
    }
}
