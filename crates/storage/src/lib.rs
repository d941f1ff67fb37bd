//! Storage manager: owns the on-disk `uploads/` / `outputs/` /
//! `temp/` tree, per-task file custody, ZIP expansion, and the age-based
//! sweep. Grounded on `pdf_service/src/storage/{backend,filesystem}.rs`'s
//! async-trait-free filesystem backend, generalized from one PDF per job to
//! a per-task subtree of many inputs and outputs.

mod error;
mod kind;
mod layout;
mod sanitize;

pub use error::StorageError;
pub use kind::{detect_kind, FileKind};
pub use layout::{Layout, ObjectRole, StorageObject};
pub use sanitize::sanitize_name;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, Copy)]
pub struct ZipLimits {
    /// Rejects any entry whose decompressed/compressed ratio exceeds this
    /// (the classic zip-bomb signature).
    pub max_ratio: f64,
    /// Absolute ceiling on the archive's total decompressed size.
    pub max_total_bytes: u64,
}

impl Default for ZipLimits {
    fn default() -> Self {
        Self {
            max_ratio: 100.0,
            max_total_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepResult {
    pub files_removed: u64,
    pub bytes_removed: u64,
    pub affected_tasks: HashSet<String>,
}

pub struct Storage {
    layout: Layout,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            layout: Layout::new(root),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Writes one uploaded file atomically (temp file + rename), enforcing
    /// `max_upload_bytes` as a streaming check and, if the client declared a
    /// content-length, verifying the bytes actually received match it.
    pub async fn store_upload<R>(
        &self,
        session_id: &str,
        task_id: &str,
        ordinal: usize,
        declared_name: &str,
        mut reader: R,
        declared_len: Option<u64>,
        max_upload_bytes: u64,
    ) -> Result<PathBuf, StorageError>
    where
        R: AsyncRead + Unpin,
    {
        let name = sanitize_name(declared_name, ordinal)?;
        let dir = self.layout.upload_dir(session_id, task_id);
        tokio::fs::create_dir_all(&dir).await?;

        let final_path = dir.join(&name);
        let tmp_path = dir.join(format!(".{}.part", name));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let mut total: u64 = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > max_upload_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(StorageError::TooLarge {
                    limit: max_upload_bytes,
                });
            }
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = declared_len {
            if expected != total {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(StorageError::LengthMismatch);
            }
        }

        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(final_path)
    }

    /// Writes a rendered output (the composite PDF) atomically under
    /// `outputs/<session>/<task>/<name>`.
    pub async fn store_output(
        &self,
        session_id: &str,
        task_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.layout.output_dir(session_id, task_id);
        tokio::fs::create_dir_all(&dir).await?;
        let final_path = dir.join(name);
        let tmp_path = dir.join(format!(".{}.part", name));
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(final_path)
    }

    /// Expands a ZIP archive already materialized in memory, admitting only
    /// `.pdf` entries (case-insensitive) and dropping everything else
    /// silently. Guards against zip-slip (entries whose path would
    /// escape the temp root) and zip-bomb (decompression ratio / absolute
    /// size ceilings) before any byte is written to disk for that entry.
    pub async fn extract_archive(
        &self,
        task_id: &str,
        zip_bytes: Vec<u8>,
        limits: ZipLimits,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let temp_dir = self.layout.temp_dir(task_id);
        tokio::task::spawn_blocking(move || extract_archive_blocking(zip_bytes, temp_dir, limits))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?
    }

    pub async fn list_objects(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<Vec<StorageObject>, StorageError> {
        let mut objects = Vec::new();
        list_dir_objects(
            &self.layout.upload_dir(session_id, task_id),
            ObjectRole::Upload,
            task_id,
            &mut objects,
        )
        .await?;
        list_dir_objects(
            &self.layout.output_dir(session_id, task_id),
            ObjectRole::Output,
            task_id,
            &mut objects,
        )
        .await?;
        list_dir_objects(
            &self.layout.temp_dir(task_id),
            ObjectRole::Temp,
            task_id,
            &mut objects,
        )
        .await?;
        Ok(objects)
    }

    /// Resolves `name` under `outputs/<session>/<task>/` with a final
    /// realpath check that the result remains under that subtree, then
    /// reads it whole.
    pub async fn open_for_read(
        &self,
        session_id: &str,
        task_id: &str,
        name: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let path = self
            .resolve_output_path(session_id, task_id, name)
            .await?;
        tokio::fs::read(&path).await.map_err(StorageError::Io)
    }

    /// `HEAD`-style probe: resolves and stats a download target without
    /// reading its bytes.
    pub async fn stat_for_read(
        &self,
        session_id: &str,
        task_id: &str,
        name: &str,
    ) -> Result<u64, StorageError> {
        let path = self
            .resolve_output_path(session_id, task_id, name)
            .await?;
        let meta = tokio::fs::metadata(&path).await?;
        Ok(meta.len())
    }

    async fn resolve_output_path(
        &self,
        session_id: &str,
        task_id: &str,
        name: &str,
    ) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(StorageError::PathEscape);
        }
        let dir = self.layout.output_dir(session_id, task_id);
        let candidate = dir.join(name);

        let canonical_dir = tokio::fs::canonicalize(&dir)
            .await
            .map_err(|_| StorageError::NotFound)?;
        let canonical_candidate = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| StorageError::NotFound)?;
        if !canonical_candidate.starts_with(&canonical_dir) {
            return Err(StorageError::PathEscape);
        }
        Ok(canonical_candidate)
    }

    /// Removes every object owned by a task. Idempotent.
    pub async fn purge(&self, session_id: &str, task_id: &str) -> Result<(), StorageError> {
        for dir in [
            self.layout.upload_dir(session_id, task_id),
            self.layout.output_dir(session_id, task_id),
            self.layout.temp_dir(task_id),
        ] {
            remove_dir_all_idempotent(&dir).await?;
        }
        Ok(())
    }

    /// Deletes every object whose mtime predates `cutoff`, skipping any task
    /// in `active_tasks` (currently held by a worker), and returns the set of
    /// tasks that lost at least one object.
    pub async fn sweep(
        &self,
        cutoff: SystemTime,
        active_tasks: &HashSet<String>,
    ) -> Result<SweepResult, StorageError> {
        let mut result = SweepResult::default();
        sweep_two_level(&self.layout.uploads_root(), cutoff, active_tasks, &mut result).await?;
        sweep_two_level(&self.layout.outputs_root(), cutoff, active_tasks, &mut result).await?;
        sweep_one_level(&self.layout.temp_root(), cutoff, active_tasks, &mut result).await?;
        Ok(result)
    }
}

fn extract_archive_blocking(
    zip_bytes: Vec<u8>,
    temp_dir: PathBuf,
    limits: ZipLimits,
) -> Result<Vec<PathBuf>, StorageError> {
    std::fs::create_dir_all(&temp_dir)?;
    let reader = std::io::Cursor::new(zip_bytes);
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut extracted = Vec::new();
    let mut total_decompressed: u64 = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        // `enclosed_name` is the zip crate's own zip-slip guard: it returns
        // `None` for absolute paths or paths containing `..` components.
        let Some(entry_name) = entry.enclosed_name() else {
            continue;
        };
        let is_pdf = entry_name
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if !is_pdf || entry.is_dir() {
            continue;
        }

        let compressed = entry.compressed_size().max(1);
        let decompressed = entry.size();
        if decompressed as f64 / compressed as f64 > limits.max_ratio {
            return Err(StorageError::ZipBomb);
        }
        total_decompressed += decompressed;
        if total_decompressed > limits.max_total_bytes {
            return Err(StorageError::ZipBomb);
        }

        // Flatten nested directories into one sanitized component: this is
        // what actually keeps extraction confined to temp_dir, regardless of
        // what enclosed_name() allowed through.
        let flat_source = entry_name.to_string_lossy().replace(['/', '\\'], "_");
        let flat_name = sanitize::sanitize_name(&flat_source, i)?;
        let dest = temp_dir.join(&flat_name);

        let mut out_file = std::fs::File::create(&dest)?;
        std::io::copy(&mut entry, &mut out_file)?;
        extracted.push(dest);
    }

    Ok(extracted)
}

async fn list_dir_objects(
    dir: &Path,
    role: ObjectRole,
    task_id: &str,
    out: &mut Vec<StorageObject>,
) -> Result<(), StorageError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        out.push(StorageObject {
            path: entry.path(),
            size: meta.len(),
            modified: meta.modified()?,
            role,
            task_id: task_id.to_string(),
        });
    }
    Ok(())
}

async fn remove_dir_all_idempotent(dir: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn sweep_two_level(
    root: &Path,
    cutoff: SystemTime,
    active: &HashSet<String>,
    result: &mut SweepResult,
) -> Result<(), StorageError> {
    let mut sessions = match tokio::fs::read_dir(root).await {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(session_entry) = sessions.next_entry().await? {
        if !session_entry.file_type().await?.is_dir() {
            continue;
        }
        let mut tasks = match tokio::fs::read_dir(session_entry.path()).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        while let Some(task_entry) = tasks.next_entry().await? {
            if !task_entry.file_type().await?.is_dir() {
                continue;
            }
            let task_id = task_entry.file_name().to_string_lossy().into_owned();
            if active.contains(&task_id) {
                continue;
            }
            sweep_files_in(&task_entry.path(), &task_id, cutoff, result).await?;
        }
    }
    Ok(())
}

async fn sweep_one_level(
    root: &Path,
    cutoff: SystemTime,
    active: &HashSet<String>,
    result: &mut SweepResult,
) -> Result<(), StorageError> {
    let mut tasks = match tokio::fs::read_dir(root).await {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(task_entry) = tasks.next_entry().await? {
        if !task_entry.file_type().await?.is_dir() {
            continue;
        }
        let task_id = task_entry.file_name().to_string_lossy().into_owned();
        if active.contains(&task_id) {
            continue;
        }
        sweep_files_in(&task_entry.path(), &task_id, cutoff, result).await?;
    }
    Ok(())
}

async fn sweep_files_in(
    dir: &Path,
    task_id: &str,
    cutoff: SystemTime,
    result: &mut SweepResult,
) -> Result<(), StorageError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if modified < cutoff {
            let size = meta.len();
            tokio::fs::remove_file(entry.path()).await?;
            result.files_removed += 1;
            result.bytes_removed += size;
            result.affected_tasks.insert(task_id.to_string());
        }
    }
    Ok(())
}
