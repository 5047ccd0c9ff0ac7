//! Transfer server.
//! One accept-loop thread hands connections to at most `thread_count`
//! session threads. Local failures (missing file, bad path) are reported
//! to the peer as error statuses and the session continues; transport
//! errors end the session but never the server.

use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel;
use crate::errors::{CopyError, Result};
use crate::net::delta::{self, DeltaOp};
use crate::net::protocol::{
    self, IO_TIMEOUT, Opcode, RemoteEntry, RemoteEntryKind, TRANSFER_BLOCK,
};

const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Point-in-time counters for a running [`Server`].
///
/// `bytes_served` counts payload bytes sent to clients (file contents and
/// delta literals); `bytes_received` counts payload written to disk on
/// behalf of clients. `uptime` is measured from the most recent start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections: u64,
    pub active_connections: usize,
    pub files_served: u64,
    pub bytes_served: u64,
    pub files_received: u64,
    pub bytes_received: u64,
    pub uptime: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    active_connections: AtomicUsize,
    files_served: AtomicU64,
    bytes_served: AtomicU64,
    files_received: AtomicU64,
    bytes_received: AtomicU64,
}

impl Counters {
    fn snapshot(&self, uptime: Duration) -> ServerStats {
        ServerStats {
            connections: self.connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::SeqCst),
            files_served: self.files_served.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            files_received: self.files_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            uptime,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    stop: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || cancel::shutdown_requested()
    }
}

/// Decrements the active-connection count when a session ends, however it
/// ends.
struct ActiveGuard<'a> {
    counters: &'a Counters,
}

impl<'a> ActiveGuard<'a> {
    fn new(counters: &'a Counters) -> Self {
        counters.active_connections.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.counters.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A transfer server bound to a TCP port. Created stopped; [`Server::start`]
/// binds the listener and spawns the accept loop. Dropping a running server
/// stops it.
#[derive(Debug)]
pub struct Server {
    requested_port: u16,
    thread_count: usize,
    shared: Arc<Shared>,
    accept_thread: Option<thread::JoinHandle<()>>,
    bound_port: Option<u16>,
    started_at: Option<Instant>,
}

impl Server {
    pub(crate) fn new(port: u16, thread_count: usize) -> Self {
        Self {
            requested_port: port,
            thread_count: thread_count.max(1),
            shared: Arc::new(Shared::default()),
            accept_thread: None,
            bound_port: None,
            started_at: None,
        }
    }

    /// Bind the listener and start accepting connections.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(CopyError::Server("server is already running".to_string()));
        }
        let addr = format!("0.0.0.0:{}", self.requested_port);
        let listener = TcpListener::bind(&addr).map_err(|source| CopyError::Network {
            addr: addr.clone(),
            source,
        })?;
        let bound = listener
            .local_addr()
            .map_err(|source| CopyError::Network {
                addr: addr.clone(),
                source,
            })?
            .port();
        listener
            .set_nonblocking(true)
            .map_err(|source| CopyError::Network { addr, source })?;

        self.shared.stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let thread_count = self.thread_count;
        let handle = thread::Builder::new()
            .name("turbocopy-accept".to_string())
            .spawn(move || accept_loop(listener, shared, thread_count))
            .map_err(|e| CopyError::Server(format!("failed to spawn accept loop: {e}")))?;

        self.accept_thread = Some(handle);
        self.bound_port = Some(bound);
        self.started_at = Some(Instant::now());
        info!(
            port = bound,
            threads = self.thread_count,
            "Transfer server listening"
        );
        Ok(())
    }

    /// Stop accepting connections and wait for in-flight sessions. Idempotent.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                warn!("Accept loop panicked");
            }
            info!(port = self.port(), "Transfer server stopped");
        }
    }

    /// True while the accept loop is alive.
    pub fn is_running(&self) -> bool {
        self.accept_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stats(&self) -> ServerStats {
        let uptime = self
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.shared.counters.snapshot(uptime)
    }

    /// The port actually bound (resolves a requested port of 0), or the
    /// requested port before the first start.
    pub fn port(&self) -> u16 {
        self.bound_port.unwrap_or(self.requested_port)
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, thread_count: usize) {
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();
    while !shared.stopping() {
        workers.retain(|handle| !handle.is_finished());
        if workers.len() >= thread_count {
            thread::sleep(ACCEPT_POLL);
            continue;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("turbocopy-session-{peer}"))
                    .spawn(move || run_session(stream, peer, &shared));
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => warn!(error = %e, %peer, "Failed to spawn session thread"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "Accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    for handle in workers {
        if handle.join().is_err() {
            warn!("Session thread panicked");
        }
    }
}

fn run_session(mut stream: TcpStream, peer: SocketAddr, shared: &Shared) {
    shared.counters.connections.fetch_add(1, Ordering::Relaxed);
    let _active = ActiveGuard::new(&shared.counters);
    debug!(%peer, "Connection accepted");
    match handle_session(&mut stream, peer, shared) {
        Ok(()) => debug!(%peer, "Session closed"),
        Err(e) => warn!(error = %e, %peer, "Session ended with an error"),
    }
}

fn handle_session(stream: &mut TcpStream, peer: SocketAddr, shared: &Shared) -> io::Result<()> {
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    let _ = stream.set_nodelay(true);

    let level = protocol::server_handshake(stream)?;
    debug!(%peer, level, "Handshake complete");

    loop {
        if shared.stopping() {
            break;
        }
        let op = match protocol::read_opcode(stream) {
            Ok(op) => op,
            // Peer hung up between commands.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        match op {
            Opcode::List => serve_list(stream)?,
            Opcode::ReadFile => serve_read_file(stream, level, shared)?,
            Opcode::WriteFile => serve_write_file(stream, shared)?,
            Opcode::ReadDelta => serve_read_delta(stream, level, shared)?,
            Opcode::Done => {
                protocol::write_status_ok(stream)?;
                break;
            }
        }
    }
    Ok(())
}

/// Fail the current block-stream transfer once the server is stopping.
fn interrupt_on_stop(shared: &Shared) -> io::Result<()> {
    if shared.stopping() {
        Err(io::Error::new(
            io::ErrorKind::Interrupted,
            "server stopping",
        ))
    } else {
        Ok(())
    }
}

fn mtime_secs(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn serve_read_file(stream: &mut TcpStream, level: u32, shared: &Shared) -> io::Result<()> {
    let path = protocol::read_path(stream)?;
    let (file, meta) = match open_regular(&path) {
        Ok(pair) => pair,
        Err(msg) => return protocol::write_status_err(stream, &msg),
    };
    protocol::write_status_ok(stream)?;
    protocol::write_varint(stream, meta.len())?;
    protocol::write_varint(stream, mtime_secs(&meta))?;

    let mut reader = BufReader::with_capacity(TRANSFER_BLOCK, file);
    let sent = protocol::send_stream(&mut reader, stream, level, |_| interrupt_on_stop(shared))?;
    shared
        .counters
        .bytes_served
        .fetch_add(sent, Ordering::Relaxed);
    shared.counters.files_served.fetch_add(1, Ordering::Relaxed);
    debug!(path = %path.display(), bytes = sent, "Served file");
    Ok(())
}

fn open_regular(path: &Path) -> std::result::Result<(fs::File, fs::Metadata), String> {
    let file = fs::File::open(path).map_err(|e| format!("open {}: {e}", path.display()))?;
    let meta = file
        .metadata()
        .map_err(|e| format!("stat {}: {e}", path.display()))?;
    if !meta.is_file() {
        return Err(format!("{} is not a regular file", path.display()));
    }
    Ok((file, meta))
}

fn serve_write_file(stream: &mut TcpStream, shared: &Shared) -> io::Result<()> {
    let path = protocol::read_path(stream)?;
    let size = protocol::read_varint(stream)?;
    let mtime = protocol::read_varint(stream)?;
    let preserve = protocol::read_varint(stream)? != 0;

    // The block stream follows the header unconditionally, so a local
    // failure still drains it before the error status goes out.
    let file = match prepare_destination(&path) {
        Ok(file) => file,
        Err(msg) => {
            protocol::recv_stream(stream, &mut io::sink(), |_| Ok(()))?;
            return protocol::write_status_err(stream, &msg);
        }
    };
    let mut writer = BufWriter::with_capacity(TRANSFER_BLOCK, file);
    let received = protocol::recv_stream(stream, &mut writer, |_| interrupt_on_stop(shared))?;
    if let Err(e) = writer.flush() {
        return protocol::write_status_err(stream, &format!("write {}: {e}", path.display()));
    }
    drop(writer);

    if received != size {
        return protocol::write_status_err(
            stream,
            &format!(
                "received {received} of {size} bytes for {}",
                path.display()
            ),
        );
    }
    if preserve {
        let t = filetime::FileTime::from_unix_time(mtime as i64, 0);
        if let Err(e) = filetime::set_file_mtime(&path, t) {
            warn!(error = %e, path = %path.display(), "Failed to set modification time");
        }
    }
    shared
        .counters
        .bytes_received
        .fetch_add(received, Ordering::Relaxed);
    shared
        .counters
        .files_received
        .fetch_add(1, Ordering::Relaxed);
    protocol::write_status_ok(stream)?;
    debug!(path = %path.display(), bytes = received, "Received file");
    Ok(())
}

fn prepare_destination(path: &Path) -> std::result::Result<fs::File, String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("create {}: {e}", parent.display()))?;
        }
    }
    fs::File::create(path).map_err(|e| format!("create {}: {e}", path.display()))
}

fn serve_list(stream: &mut TcpStream) -> io::Result<()> {
    let path = protocol::read_path(stream)?;
    let entries = match read_dir_entries(&path) {
        Ok(entries) => entries,
        Err(msg) => return protocol::write_status_err(stream, &msg),
    };
    protocol::write_status_ok(stream)?;
    protocol::write_entries(stream, &entries)?;
    debug!(path = %path.display(), count = entries.len(), "Served listing");
    Ok(())
}

fn read_dir_entries(path: &Path) -> std::result::Result<Vec<RemoteEntry>, String> {
    let dir = fs::read_dir(path).map_err(|e| format!("read {}: {e}", path.display()))?;
    let mut entries = Vec::new();
    for entry in dir {
        let entry = entry.map_err(|e| format!("read {}: {e}", path.display()))?;
        let file_type = entry
            .file_type()
            .map_err(|e| format!("stat {}: {e}", entry.path().display()))?;
        let kind = if file_type.is_symlink() {
            RemoteEntryKind::Symlink
        } else if file_type.is_dir() {
            RemoteEntryKind::Dir
        } else if file_type.is_file() {
            RemoteEntryKind::File
        } else {
            // Sockets, devices and the like are not served.
            continue;
        };
        let size = if kind == RemoteEntryKind::File {
            entry.metadata().map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        entries.push(RemoteEntry {
            kind,
            name: PathBuf::from(entry.file_name()),
            size,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn serve_read_delta(stream: &mut TcpStream, level: u32, shared: &Shared) -> io::Result<()> {
    let path = protocol::read_path(stream)?;
    let signature = protocol::read_signature(stream)?;
    let (source, meta) = match read_source(&path) {
        Ok(pair) => pair,
        Err(msg) => return protocol::write_status_err(stream, &msg),
    };

    let delta = delta::compute_delta(&source, &signature);
    protocol::write_status_ok(stream)?;
    if !delta.is_worthwhile() {
        protocol::write_varint(stream, 0)?;
        debug!(path = %path.display(), "Delta below match threshold, full transfer advised");
        return Ok(());
    }
    protocol::write_varint(stream, 1)?;
    protocol::write_varint(stream, source.len() as u64)?;
    protocol::write_varint(stream, mtime_secs(&meta))?;

    let mut literal_bytes: u64 = 0;
    for op in &delta.ops {
        if let DeltaOp::Literal(bytes) = op {
            literal_bytes += bytes.len() as u64;
        }
        protocol::write_delta_op(stream, op, level)?;
        interrupt_on_stop(shared)?;
    }
    protocol::write_delta_end(stream)?;

    shared
        .counters
        .bytes_served
        .fetch_add(literal_bytes, Ordering::Relaxed);
    shared.counters.files_served.fetch_add(1, Ordering::Relaxed);
    debug!(
        path = %path.display(),
        ops = delta.ops.len(),
        literal_bytes,
        "Served delta"
    );
    Ok(())
}

fn read_source(path: &Path) -> std::result::Result<(Vec<u8>, fs::Metadata), String> {
    let meta = fs::metadata(path).map_err(|e| format!("stat {}: {e}", path.display()))?;
    if !meta.is_file() {
        return Err(format!("{} is not a regular file", path.display()));
    }
    let bytes = fs::read(path).map_err(|e| format!("read {}: {e}", path.display()))?;
    Ok((bytes, meta))
}
