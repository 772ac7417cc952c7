// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memory-mapped files.
//!
//! Safe wrapper around `open` + `mmap(MAP_SHARED)` for the CnC file and the
//! log buffers announced by the driver. The mapping is released on drop; the
//! file itself is never removed by the client (the driver owns its lifecycle).
//!
//! [`MappedFile::try_map`] is the non-blocking probe used by the conductor: a
//! file that does not exist yet, or is still shorter than required, is reported
//! as an outcome rather than an error so the caller can retry later.

use crate::concurrent::AtomicBuffer;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

/// Result of a non-blocking mapping attempt.
#[derive(Debug)]
pub enum MapOutcome {
    /// File mapped successfully.
    Mapped(MappedFile),
    /// File does not exist (yet).
    NotFound,
    /// File exists but is shorter than required.
    SizeMismatch { actual: u64, expected: u64 },
}

/// Read/write shared mapping of a whole file.
pub struct MappedFile {
    /// Pointer to mapped memory region
    ptr: *mut u8,
    /// Size of the mapping
    len: usize,
    /// Path the mapping was created from
    path: PathBuf,
}

// SAFETY: the mapping is MAP_SHARED memory that may be accessed from any
// thread. All concurrent access goes through AtomicBuffer views.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

impl MappedFile {
    /// Probe and map an existing file of at least `min_length` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Io` for failures other than a missing file (permissions,
    /// mmap failure).
    pub fn try_map(path: &Path, min_length: u64) -> Result<MapOutcome> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(MapOutcome::NotFound),
            Err(e) => return Err(e.into()),
        };

        let actual = file.metadata()?.len();
        if actual < min_length || actual == 0 {
            return Ok(MapOutcome::SizeMismatch {
                actual,
                expected: min_length,
            });
        }

        let len = usize::try_from(actual)
            .map_err(|_| Error::InvalidArgument(format!("file too large to map: {actual}")))?;
        Self::map_fd(&file, len, path).map(MapOutcome::Mapped)
    }

    /// Create (or truncate) a file of `len` zeroed bytes and map it.
    ///
    /// # Errors
    ///
    /// Returns `Io` if creation, sizing or mapping fails.
    pub fn create(path: &Path, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;
        Self::map_fd(&file, len, path)
    }

    fn map_fd(file: &File, len: usize, path: &Path) -> Result<Self> {
        // SAFETY:
        // - First argument is null, letting the kernel choose the address
        // - len is the current file length (non-zero, checked by callers)
        // - PROT_READ | PROT_WRITE matches the read/write open mode
        // - MAP_SHARED makes updates visible to the driver process
        // - file.as_raw_fd() is valid for the duration of this call
        // - mmap returns MAP_FAILED on error (checked below)
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }

        // The fd is closed when `file` drops; the mapping keeps its own reference.
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
            path: path.to_path_buf(),
        })
    }

    /// View over the whole mapping.
    #[must_use]
    pub fn buffer(&self) -> AtomicBuffer {
        // SAFETY:
        // - ptr/len describe a live mapping owned by self
        // - mmap returns page-aligned addresses (>= 8-byte alignment)
        // - callers hold the MappedFile (directly or via Arc) while using views
        unsafe { AtomicBuffer::new(self.ptr, self.len) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // SAFETY:
        // - ptr and len come from a successful mmap in map_fd
        // - no AtomicBuffer view outlives the owner by contract
        // - munmap errors are ignored; there is nothing to recover in drop
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_map_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = MappedFile::try_map(&dir.path().join("absent.log"), 64).expect("probe");
        assert!(matches!(outcome, MapOutcome::NotFound));
    }

    #[test]
    fn test_try_map_short_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("short.log");
        std::fs::write(&path, [0u8; 16]).expect("write");

        let outcome = MappedFile::try_map(&path, 4096).expect("probe");
        assert!(matches!(
            outcome,
            MapOutcome::SizeMismatch {
                actual: 16,
                expected: 4096
            }
        ));
    }

    #[test]
    fn test_create_and_share_between_mappings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shared.dat");

        let writer = MappedFile::create(&path, 4096).expect("create");
        writer.buffer().put_i64_ordered(128, 0x5EED);

        let reader = match MappedFile::try_map(&path, 4096).expect("probe") {
            MapOutcome::Mapped(file) => file,
            other => panic!("expected mapping, got {other:?}"),
        };
        assert_eq!(reader.len(), 4096);
        assert_eq!(reader.buffer().get_i64_volatile(128), 0x5EED);
    }
}
