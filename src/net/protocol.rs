//! Wire protocol primitives.
//!
//! Framing shared by client and server: magic/version/level handshake,
//! LEB128 varints, length-prefixed path/message strings, and the block
//! stream (per-block zlib, sent compressed only when smaller). Everything
//! here is `io::Result`; the session layers classify failures into
//! `Network`/`Timeout`/`Server`/`Client`.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::config::MAX_COMPRESSION_LEVEL;
use crate::fs_ops::normalize::{path_to_wire, wire_to_path};

use super::delta::{BlockSum, Signature};

/// "TCPY" big-endian.
pub(crate) const MAGIC: u32 = 0x5443_5059;
pub(crate) const PROTOCOL_VERSION: u8 = 1;

pub const DEFAULT_PORT: u16 = 31337;
pub const DEFAULT_THREAD_COUNT: usize = 4;

/// Socket read/write timeout; a stalled peer surfaces as `Timeout`.
pub(crate) const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Transfer granularity for whole-file streams.
pub(crate) const TRANSFER_BLOCK: usize = 256 * 1024;

const MAX_STRING_BYTES: u64 = 64 * 1024;
const MAX_BLOCK_BYTES: u64 = 16 * 1024 * 1024;
const MAX_SIGNATURE_BLOCKS: u64 = 1 << 24;

const BLOCK_FLAG_RAW: u8 = 0;
const BLOCK_FLAG_ZLIB: u8 = 1;
const BLOCK_FLAG_END: u8 = 0xFF;

pub(crate) const STATUS_OK: u8 = 0;
pub(crate) const STATUS_ERR: u8 = 1;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Client-side commands. Every command gets a reply starting with a status
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opcode {
    List = 1,
    ReadFile = 2,
    WriteFile = 3,
    ReadDelta = 4,
    Done = 5,
}

impl Opcode {
    pub(crate) fn from_u8(v: u8) -> io::Result<Self> {
        Ok(match v {
            1 => Opcode::List,
            2 => Opcode::ReadFile,
            3 => Opcode::WriteFile,
            4 => Opcode::ReadDelta,
            5 => Opcode::Done,
            other => return Err(invalid_data(format!("unknown opcode {other}"))),
        })
    }
}

pub(crate) fn write_opcode(w: &mut impl Write, op: Opcode) -> io::Result<()> {
    w.write_all(&[op as u8])
}

pub(crate) fn read_opcode(r: &mut impl Read) -> io::Result<Opcode> {
    Opcode::from_u8(read_u8(r)?)
}

fn read_u8(r: &mut impl Read) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

/// Unsigned LEB128.
pub(crate) fn write_varint(w: &mut impl Write, mut v: u64) -> io::Result<()> {
    loop {
        let mut byte = (v & 0x7F) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        w.write_all(&[byte])?;
        if v == 0 {
            return Ok(());
        }
    }
}

pub(crate) fn read_varint(r: &mut impl Read) -> io::Result<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..10 {
        let byte = read_u8(r)?;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(invalid_data("varint longer than 10 bytes"))
}

fn read_len_prefixed(r: &mut impl Read, cap: u64, what: &str) -> io::Result<Vec<u8>> {
    let len = read_varint(r)?;
    if len > cap {
        return Err(invalid_data(format!("{what} length {len} exceeds cap {cap}")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn write_path(w: &mut impl Write, path: &Path) -> io::Result<()> {
    let bytes = path_to_wire(path);
    write_varint(w, bytes.len() as u64)?;
    w.write_all(&bytes)
}

pub(crate) fn read_path(r: &mut impl Read) -> io::Result<PathBuf> {
    let bytes = read_len_prefixed(r, MAX_STRING_BYTES, "path")?;
    Ok(wire_to_path(&bytes))
}

pub(crate) fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
    write_varint(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}

pub(crate) fn read_string(r: &mut impl Read) -> io::Result<String> {
    let bytes = read_len_prefixed(r, MAX_STRING_BYTES, "string")?;
    String::from_utf8(bytes).map_err(|_| invalid_data("string is not valid UTF-8"))
}

pub(crate) fn write_status_ok(w: &mut impl Write) -> io::Result<()> {
    w.write_all(&[STATUS_OK])
}

pub(crate) fn write_status_err(w: &mut impl Write, msg: &str) -> io::Result<()> {
    w.write_all(&[STATUS_ERR])?;
    write_string(w, msg)
}

/// Read a reply status. Outer error = transport; inner = peer-reported.
pub(crate) fn read_status(r: &mut impl Read) -> io::Result<Result<(), String>> {
    match read_u8(r)? {
        STATUS_OK => Ok(Ok(())),
        STATUS_ERR => Ok(Err(read_string(r)?)),
        other => Err(invalid_data(format!("unknown status byte {other}"))),
    }
}

/// Client hello: magic, version, requested level. Returns the accepted
/// level from the server's mirror reply.
pub(crate) fn client_handshake<S: Read + Write>(stream: &mut S, level: u32) -> io::Result<u32> {
    let mut hello = [0u8; 6];
    hello[..4].copy_from_slice(&MAGIC.to_be_bytes());
    hello[4] = PROTOCOL_VERSION;
    hello[5] = level.min(MAX_COMPRESSION_LEVEL) as u8;
    stream.write_all(&hello)?;
    stream.flush()?;

    let mut reply = [0u8; 6];
    stream.read_exact(&mut reply)?;
    check_preamble(&reply)?;
    Ok(u32::from(reply[5]))
}

/// Server half: validate the hello, accept min(requested, max), mirror it.
pub(crate) fn server_handshake<S: Read + Write>(stream: &mut S) -> io::Result<u32> {
    let mut hello = [0u8; 6];
    stream.read_exact(&mut hello)?;
    check_preamble(&hello)?;
    let accepted = hello[5].min(MAX_COMPRESSION_LEVEL as u8);

    let mut reply = [0u8; 6];
    reply[..4].copy_from_slice(&MAGIC.to_be_bytes());
    reply[4] = PROTOCOL_VERSION;
    reply[5] = accepted;
    stream.write_all(&reply)?;
    stream.flush()?;
    Ok(u32::from(accepted))
}

fn check_preamble(buf: &[u8; 6]) -> io::Result<()> {
    let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC {
        return Err(invalid_data(format!("bad magic {magic:#010x}")));
    }
    if buf[4] != PROTOCOL_VERSION {
        return Err(invalid_data(format!(
            "unsupported protocol version {}",
            buf[4]
        )));
    }
    Ok(())
}

/// One data block: `[flag][varint raw_len][varint stored_len][bytes]`.
/// Compressed form is used only when it is actually smaller.
pub(crate) fn write_block(w: &mut impl Write, data: &[u8], level: u32) -> io::Result<()> {
    if level > 0 {
        let mut enc = ZlibEncoder::new(
            Vec::with_capacity(data.len() / 2 + 64),
            Compression::new(level.min(MAX_COMPRESSION_LEVEL)),
        );
        enc.write_all(data)?;
        let compressed = enc.finish()?;
        if compressed.len() < data.len() {
            w.write_all(&[BLOCK_FLAG_ZLIB])?;
            write_varint(w, data.len() as u64)?;
            write_varint(w, compressed.len() as u64)?;
            return w.write_all(&compressed);
        }
    }
    w.write_all(&[BLOCK_FLAG_RAW])?;
    write_varint(w, data.len() as u64)?;
    write_varint(w, data.len() as u64)?;
    w.write_all(data)
}

pub(crate) fn write_block_end(w: &mut impl Write) -> io::Result<()> {
    w.write_all(&[BLOCK_FLAG_END])
}

/// Next block of a stream, `None` at the end marker.
pub(crate) fn read_block(r: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let flag = read_u8(r)?;
    if flag == BLOCK_FLAG_END {
        return Ok(None);
    }
    let raw_len = read_varint(r)?;
    let stored_len = read_varint(r)?;
    if raw_len > MAX_BLOCK_BYTES || stored_len > MAX_BLOCK_BYTES {
        return Err(invalid_data(format!(
            "block length {raw_len}/{stored_len} exceeds cap"
        )));
    }
    let mut stored = vec![0u8; stored_len as usize];
    r.read_exact(&mut stored)?;

    match flag {
        BLOCK_FLAG_RAW => {
            if raw_len != stored_len {
                return Err(invalid_data("raw block length mismatch"));
            }
            Ok(Some(stored))
        }
        BLOCK_FLAG_ZLIB => {
            let mut out = Vec::with_capacity(raw_len as usize);
            ZlibDecoder::new(&stored[..]).read_to_end(&mut out)?;
            if out.len() as u64 != raw_len {
                return Err(invalid_data("inflated block length mismatch"));
            }
            Ok(Some(out))
        }
        other => Err(invalid_data(format!("unknown block flag {other}"))),
    }
}

/// Stream `reader` to EOF as a block stream. Returns raw bytes sent.
/// `observe` runs after each block with the raw block length.
pub(crate) fn send_stream(
    reader: &mut impl Read,
    w: &mut impl Write,
    level: u32,
    mut observe: impl FnMut(u64) -> io::Result<()>,
) -> io::Result<u64> {
    let mut chunk = vec![0u8; TRANSFER_BLOCK];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        write_block(w, &chunk[..n], level)?;
        total += n as u64;
        observe(n as u64)?;
    }
    write_block_end(w)?;
    Ok(total)
}

/// Drain a block stream into `writer`. Returns raw bytes received.
/// `observe` runs after each block with the raw block length.
pub(crate) fn recv_stream(
    r: &mut impl Read,
    writer: &mut impl Write,
    mut observe: impl FnMut(u64) -> io::Result<()>,
) -> io::Result<u64> {
    let mut total: u64 = 0;
    while let Some(block) = read_block(r)? {
        writer.write_all(&block)?;
        total += block.len() as u64;
        observe(block.len() as u64)?;
    }
    Ok(total)
}

/// Directory entry in a `List` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteEntry {
    pub kind: RemoteEntryKind,
    pub name: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteEntryKind {
    File = 0,
    Dir = 1,
    Symlink = 2,
}

impl RemoteEntryKind {
    fn from_u8(v: u8) -> io::Result<Self> {
        Ok(match v {
            0 => RemoteEntryKind::File,
            1 => RemoteEntryKind::Dir,
            2 => RemoteEntryKind::Symlink,
            other => return Err(invalid_data(format!("unknown entry kind {other}"))),
        })
    }
}

pub(crate) fn write_entries(w: &mut impl Write, entries: &[RemoteEntry]) -> io::Result<()> {
    write_varint(w, entries.len() as u64)?;
    for entry in entries {
        w.write_all(&[entry.kind as u8])?;
        write_path(w, &entry.name)?;
        write_varint(w, entry.size)?;
    }
    Ok(())
}

pub(crate) fn read_entries(r: &mut impl Read) -> io::Result<Vec<RemoteEntry>> {
    let count = read_varint(r)?;
    if count > MAX_SIGNATURE_BLOCKS {
        return Err(invalid_data(format!("entry count {count} exceeds cap")));
    }
    let mut entries = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        let kind = RemoteEntryKind::from_u8(read_u8(r)?)?;
        let name = read_path(r)?;
        let size = read_varint(r)?;
        entries.push(RemoteEntry { kind, name, size });
    }
    Ok(entries)
}

const DELTA_END: u8 = 0;
const DELTA_COPY: u8 = 1;
const DELTA_LITERAL: u8 = 2;

/// One reconstruction op: `[1][varint index][varint count]` copies
/// reference blocks, `[2][block]` carries literal bytes, `[0]` ends.
pub(crate) fn write_delta_op(
    w: &mut impl Write,
    op: &super::delta::DeltaOp,
    level: u32,
) -> io::Result<()> {
    match op {
        super::delta::DeltaOp::Copy {
            block_index,
            block_count,
        } => {
            w.write_all(&[DELTA_COPY])?;
            write_varint(w, *block_index)?;
            write_varint(w, *block_count)
        }
        super::delta::DeltaOp::Literal(bytes) => {
            w.write_all(&[DELTA_LITERAL])?;
            write_block(w, bytes, level)
        }
    }
}

pub(crate) fn write_delta_end(w: &mut impl Write) -> io::Result<()> {
    w.write_all(&[DELTA_END])
}

/// Next delta op, `None` at the end marker.
pub(crate) fn read_delta_op(r: &mut impl Read) -> io::Result<Option<super::delta::DeltaOp>> {
    match read_u8(r)? {
        DELTA_END => Ok(None),
        DELTA_COPY => {
            let block_index = read_varint(r)?;
            let block_count = read_varint(r)?;
            Ok(Some(super::delta::DeltaOp::Copy {
                block_index,
                block_count,
            }))
        }
        DELTA_LITERAL => {
            let bytes = read_block(r)?
                .ok_or_else(|| invalid_data("literal op carries an end-of-stream block"))?;
            Ok(Some(super::delta::DeltaOp::Literal(bytes)))
        }
        other => Err(invalid_data(format!("unknown delta op {other}"))),
    }
}

/// Signature frame: varint block size, varint count, per block the rolling
/// checksum (varint) and 16 MD5 bytes.
pub(crate) fn write_signature(w: &mut impl Write, sig: &Signature) -> io::Result<()> {
    write_varint(w, sig.block_size() as u64)?;
    write_varint(w, sig.blocks.len() as u64)?;
    for block in &sig.blocks {
        write_varint(w, u64::from(block.rolling))?;
        w.write_all(&block.strong)?;
    }
    Ok(())
}

pub(crate) fn read_signature(r: &mut impl Read) -> io::Result<Signature> {
    let block_size = read_varint(r)?;
    if block_size == 0 || block_size > MAX_BLOCK_BYTES {
        return Err(invalid_data(format!("signature block size {block_size}")));
    }
    let count = read_varint(r)?;
    if count > MAX_SIGNATURE_BLOCKS {
        return Err(invalid_data(format!(
            "signature block count {count} exceeds cap"
        )));
    }
    let mut blocks = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        let rolling = read_varint(r)?;
        if rolling > u64::from(u32::MAX) {
            return Err(invalid_data("rolling checksum out of range"));
        }
        let mut strong = [0u8; 16];
        r.read_exact(&mut strong)?;
        blocks.push(BlockSum {
            rolling: rolling as u32,
            strong,
        });
    }
    Ok(Signature {
        block_size: block_size as usize,
        blocks,
    })
}
