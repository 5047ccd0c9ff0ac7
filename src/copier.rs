//! The engine handle. A `Copier` owns one `CopySettings` instance and
//! exposes every copy operation; the module-level free functions run the
//! same operations with default settings.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::batch::{self, CopyTask};
use crate::cancel::{self, CancelToken};
use crate::config::CopySettings;
use crate::errors::{CopyError, Result};
use crate::fs_ops::copy_file::{self, MetadataFidelity};
use crate::fs_ops::meta;
use crate::fs_ops::normalize::normalize;
use crate::fs_ops::tree::{self, TreeCopyOptions};
use crate::net::client;
use crate::net::delta;
use crate::net::server::Server;
use crate::progress::Reporter;

/// Engine handle. Settings mutated through [`Copier::settings_mut`] apply
/// to operations started afterwards on this handle only.
#[derive(Debug, Default, Clone)]
pub struct Copier {
    settings: CopySettings,
}

impl Copier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: CopySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CopySettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut CopySettings {
        &mut self.settings
    }

    fn reporter(&self) -> Reporter {
        Reporter::new(self.settings.progress_callback.clone())
    }

    /// Copy file content only; destination metadata is whatever the
    /// filesystem assigns. Appends the source's basename when `dst` is an
    /// existing directory. Returns the path actually written.
    pub fn copy(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<PathBuf> {
        self.single(src.as_ref(), dst.as_ref(), MetadataFidelity::ContentOnly, true)
    }

    /// Like [`Copier::copy`], but also preserves timestamps, permissions
    /// and (where supported) extended attributes.
    pub fn copy2(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<PathBuf> {
        self.single(src.as_ref(), dst.as_ref(), MetadataFidelity::Full, true)
    }

    /// Strict content copy: `dst` names the file itself and must not be an
    /// existing directory.
    pub fn copyfile(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<PathBuf> {
        self.single(src.as_ref(), dst.as_ref(), MetadataFidelity::ContentOnly, false)
    }

    fn single(
        &self,
        src: &Path,
        dst: &Path,
        fidelity: MetadataFidelity,
        append_basename: bool,
    ) -> Result<PathBuf> {
        self.settings.validate()?;
        let reporter = self.reporter();
        if reporter.is_enabled() {
            if let Some(len) = payload_len(src, &self.settings) {
                reporter.set_total(len);
            }
        }
        copy_file::with_retries(&self.settings, "copy", || {
            copy_file::copy_one(
                src,
                dst,
                fidelity,
                append_basename,
                &self.settings,
                Some(&reporter),
                None,
            )
        })
    }

    /// Recursively copy the tree rooted at `src` into `dst`.
    pub fn copytree(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
        opts: &TreeCopyOptions,
    ) -> Result<()> {
        self.settings.validate()?;
        let reporter = self.reporter();
        tree::copy_tree(
            src.as_ref(),
            dst.as_ref(),
            opts,
            &self.settings,
            Some(&reporter),
            None,
        )
    }

    /// Copy each `(src, dst)` pair in list order, content only.
    pub fn batch_copy<P, Q>(&self, pairs: &[(P, Q)]) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.batch_files(pairs, MetadataFidelity::ContentOnly)
    }

    /// Copy each pair in list order, preserving metadata.
    pub fn batch_copy2<P, Q>(&self, pairs: &[(P, Q)]) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.batch_files(pairs, MetadataFidelity::Full)
    }

    fn batch_files<P, Q>(&self, pairs: &[(P, Q)], fidelity: MetadataFidelity) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.settings.validate()?;
        let reporter = self.reporter();
        batch::run_batch(pairs, &self.settings, None, |src, dst| {
            if reporter.is_enabled() {
                if let Some(len) = payload_len(src, &self.settings) {
                    reporter.add_total(len);
                }
            }
            copy_file::with_retries(&self.settings, "copy", || {
                copy_file::copy_one(src, dst, fidelity, true, &self.settings, Some(&reporter), None)
            })
            .map(|_| ())
        })
    }

    /// Tree-copy each pair in list order with the same walk options.
    pub fn batch_copytree<P, Q>(&self, pairs: &[(P, Q)], opts: &TreeCopyOptions) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.settings.validate()?;
        let reporter = self.reporter();
        batch::run_batch(pairs, &self.settings, None, |src, dst| {
            tree::copy_tree(src, dst, opts, &self.settings, Some(&reporter), None)
        })
    }

    /// Rebuild `dst` from `reference` plus the delta of `src` against it.
    /// Copies in full when the reference is missing or too dissimilar.
    pub fn delta_copy(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
        reference: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        self.settings.validate()?;
        let reporter = self.reporter();
        delta_copy_local(
            src.as_ref(),
            dst.as_ref(),
            reference.as_ref(),
            &self.settings,
            &reporter,
            None,
        )
    }

    /// Copy through a transfer server, falling back to a local copy when
    /// the server cannot be reached.
    pub fn copy_with_server(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
        server_addr: &str,
        port: u16,
        compression_level: u32,
    ) -> Result<PathBuf> {
        self.settings.validate()?;
        let reporter = self.reporter();
        client::copy_with_server(
            src.as_ref(),
            dst.as_ref(),
            server_addr,
            port,
            compression_level,
            &self.settings,
            Some(&reporter),
            None,
        )
    }

    /// Build a transfer server handle. The server is not started.
    pub fn create_server(&self, port: u16, thread_count: usize) -> Server {
        Server::new(port, thread_count)
    }

    /// Run [`Copier::copy`] on its own thread. The returned task can be
    /// cancelled without affecting any other task.
    pub fn spawn_copy(&self, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> CopyTask {
        self.spawn_single(src.into(), dst.into(), MetadataFidelity::ContentOnly)
    }

    /// Run [`Copier::copy2`] on its own thread.
    pub fn spawn_copy2(&self, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> CopyTask {
        self.spawn_single(src.into(), dst.into(), MetadataFidelity::Full)
    }

    fn spawn_single(&self, src: PathBuf, dst: PathBuf, fidelity: MetadataFidelity) -> CopyTask {
        let settings = self.settings.clone();
        CopyTask::spawn(move |cancel| {
            settings.validate()?;
            let reporter = Reporter::new(settings.progress_callback.clone());
            if reporter.is_enabled() {
                if let Some(len) = payload_len(&src, &settings) {
                    reporter.set_total(len);
                }
            }
            copy_file::with_retries(&settings, "copy", || {
                copy_file::copy_one(
                    &src,
                    &dst,
                    fidelity,
                    true,
                    &settings,
                    Some(&reporter),
                    Some(&cancel),
                )
            })
        })
    }

    /// Run [`Copier::copytree`] on its own thread.
    pub fn spawn_copytree(
        &self,
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
        opts: TreeCopyOptions,
    ) -> CopyTask<()> {
        let src = src.into();
        let dst = dst.into();
        let settings = self.settings.clone();
        CopyTask::spawn(move |cancel| {
            settings.validate()?;
            let reporter = Reporter::new(settings.progress_callback.clone());
            tree::copy_tree(&src, &dst, &opts, &settings, Some(&reporter), Some(&cancel))
        })
    }

    /// One independently cancellable task per pair.
    pub fn spawn_batch_copy(&self, pairs: Vec<(PathBuf, PathBuf)>) -> Vec<CopyTask> {
        pairs
            .into_iter()
            .map(|(src, dst)| self.spawn_copy(src, dst))
            .collect()
    }
}

/// Size of the payload a single-file copy of `src` would move, when that is
/// knowable up front.
fn payload_len(src: &Path, settings: &CopySettings) -> Option<u64> {
    if !settings.follow_symlinks {
        let link_meta = fs::symlink_metadata(src).ok()?;
        if link_meta.file_type().is_symlink() {
            return None;
        }
    }
    let meta = fs::metadata(src).ok()?;
    if meta.is_file() { Some(meta.len()) } else { None }
}

fn delta_copy_local(
    src: &Path,
    dst: &Path,
    reference: &Path,
    settings: &CopySettings,
    reporter: &Reporter,
    cancel: Option<&CancelToken>,
) -> Result<PathBuf> {
    cancel::check(cancel)?;
    let src = normalize(src)?;
    let dst = normalize(dst)?;
    let reference = normalize(reference)?;

    let src_meta = fs::metadata(&src).map_err(|e| CopyError::from_io(e, &src))?;
    if src_meta.is_dir() {
        return Err(CopyError::SourceIsDirectory(src));
    }
    if reporter.is_enabled() {
        reporter.set_total(src_meta.len());
    }
    let fidelity = if settings.preserve_metadata {
        MetadataFidelity::Full
    } else {
        MetadataFidelity::ContentOnly
    };

    let full_copy = |why: &str| {
        debug!(
            src = %src.display(),
            reference = %reference.display(),
            "{why}, copying in full"
        );
        copy_file::with_retries(settings, "delta fallback", || {
            copy_file::copy_one(&src, &dst, fidelity, true, settings, Some(reporter), cancel)
        })
    };

    let reference_bytes = match fs::read(&reference) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return full_copy("Reference missing"),
        Err(e) => return Err(CopyError::from_io(e, &reference)),
    };
    let source = fs::read(&src).map_err(|e| CopyError::from_io(e, &src))?;
    cancel::check(cancel)?;

    let block_size = delta::block_size_for_len(reference_bytes.len() as u64);
    let signature = delta::compute_signature(&reference_bytes, block_size);
    let computed = delta::compute_delta(&source, &signature);
    if !computed.is_worthwhile() {
        return full_copy("Reference too dissimilar");
    }

    let rebuilt = delta::apply_delta(&reference_bytes, block_size, &computed.ops)?;
    if rebuilt.len() != source.len() {
        return Err(CopyError::DeltaCopy(format!(
            "reconstruction produced {} bytes, source has {}",
            rebuilt.len(),
            source.len()
        )));
    }

    let final_dst = if dst.is_dir() {
        match src.file_name() {
            Some(name) => dst.join(name),
            None => {
                return Err(CopyError::Path {
                    path: src.clone(),
                    reason: "source has no file name to append to the destination directory"
                        .to_string(),
                });
            }
        }
    } else {
        dst
    };
    if let Some(parent) = final_dst.parent() {
        fs::create_dir_all(parent).map_err(|e| CopyError::from_io(e, parent))?;
    }

    reporter.file_started(&final_dst);
    fs::write(&final_dst, &rebuilt).map_err(|e| CopyError::from_io(e, &final_dst))?;
    reporter.advance(rebuilt.len() as u64, &final_dst);
    if matches!(fidelity, MetadataFidelity::Full) {
        meta::preserve_all(&src, &final_dst, &src_meta);
    }
    reporter.file_done(&final_dst);
    info!(
        src = %src.display(),
        dst = %final_dst.display(),
        matched = computed.matched_bytes,
        total = computed.source_len,
        "Delta copy complete"
    );
    Ok(final_dst)
}

/// [`Copier::copy`] with default settings.
pub fn copy(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<PathBuf> {
    Copier::new().copy(src, dst)
}

/// [`Copier::copy2`] with default settings.
pub fn copy2(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<PathBuf> {
    Copier::new().copy2(src, dst)
}

/// [`Copier::copyfile`] with default settings.
pub fn copyfile(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<PathBuf> {
    Copier::new().copyfile(src, dst)
}

/// [`Copier::copytree`] with default settings.
pub fn copytree(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    opts: &TreeCopyOptions,
) -> Result<()> {
    Copier::new().copytree(src, dst, opts)
}

/// [`Copier::batch_copy`] with default settings.
pub fn batch_copy<P: AsRef<Path>, Q: AsRef<Path>>(pairs: &[(P, Q)]) -> Result<()> {
    Copier::new().batch_copy(pairs)
}

/// [`Copier::batch_copy2`] with default settings.
pub fn batch_copy2<P: AsRef<Path>, Q: AsRef<Path>>(pairs: &[(P, Q)]) -> Result<()> {
    Copier::new().batch_copy2(pairs)
}

/// [`Copier::batch_copytree`] with default settings.
pub fn batch_copytree<P: AsRef<Path>, Q: AsRef<Path>>(
    pairs: &[(P, Q)],
    opts: &TreeCopyOptions,
) -> Result<()> {
    Copier::new().batch_copytree(pairs, opts)
}

/// [`Copier::delta_copy`] with default settings.
pub fn delta_copy(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    reference: impl AsRef<Path>,
) -> Result<PathBuf> {
    Copier::new().delta_copy(src, dst, reference)
}

/// [`Copier::copy_with_server`] with default settings.
pub fn copy_with_server(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    server_addr: &str,
    port: u16,
    compression_level: u32,
) -> Result<PathBuf> {
    Copier::new().copy_with_server(src, dst, server_addr, port, compression_level)
}

/// A stopped transfer server handle for `port`/`thread_count`.
pub fn create_server(port: u16, thread_count: usize) -> Server {
    Server::new(port, thread_count)
}
