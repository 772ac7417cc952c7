// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log buffer files announced by the driver.
//!
//! # File Layout
//!
//! ```text
//! +------------------+------------------+------------------+-----------+
//! | term 0           | term 1           | term 2           | metadata  |
//! | term_length      | term_length      | term_length      | 4096 B    |
//! +------------------+------------------+------------------+-----------+
//! ```
//!
//! The metadata section sits at the end of the file. The driver sizes the
//! file first and fills the metadata afterwards, so a mapping attempt can see
//! the file before it is usable. That case is reported as
//! [`LogMapping::NotReady`] and retried by the conductor; metadata that is
//! present but inconsistent is a permanent [`Error::ResourceMapping`].

use crate::concurrent::{align, AtomicBuffer};
use crate::error::{Error, Result};
use crate::mapped::{MapOutcome, MappedFile};
use std::path::Path;

/// Number of term partitions in a log.
pub const PARTITION_COUNT: usize = 3;

pub const TERM_MIN_LENGTH: i32 = 64 * 1024;
pub const TERM_MAX_LENGTH: i32 = 1024 * 1024 * 1024;
pub const PAGE_MIN_SIZE: i32 = 4 * 1024;
pub const PAGE_MAX_SIZE: i32 = 1024 * 1024 * 1024;

/// Length of the metadata section at the end of the file.
pub const LOG_META_DATA_LENGTH: usize = 4096;

pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const LOG_ACTIVE_TERM_COUNT_OFFSET: usize = 24;
pub const LOG_END_OF_STREAM_POSITION_OFFSET: usize = 128;
pub const LOG_IS_CONNECTED_OFFSET: usize = 136;
pub const LOG_CORRELATION_ID_OFFSET: usize = 256;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = 264;
pub const LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET: usize = 268;
pub const LOG_MTU_LENGTH_OFFSET: usize = 272;
pub const LOG_TERM_LENGTH_OFFSET: usize = 276;
pub const LOG_PAGE_SIZE_OFFSET: usize = 280;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = 320;

/// Smallest file that can possibly hold a valid log.
pub const MIN_LOG_LENGTH: usize = PARTITION_COUNT * TERM_MIN_LENGTH as usize + LOG_META_DATA_LENGTH;

/// Expected file length for a term length and page size.
#[must_use]
pub fn compute_log_length(term_length: i32, page_size: i32) -> usize {
    align(
        PARTITION_COUNT * term_length as usize + LOG_META_DATA_LENGTH,
        page_size as usize,
    )
}

/// Check a term length against the supported range.
///
/// # Errors
///
/// `ResourceMapping` if out of range or not a power of two.
pub fn check_term_length(term_length: i32) -> Result<()> {
    if !(TERM_MIN_LENGTH..=TERM_MAX_LENGTH).contains(&term_length) {
        return Err(Error::ResourceMapping(format!(
            "term length {term_length} outside [{TERM_MIN_LENGTH}, {TERM_MAX_LENGTH}]"
        )));
    }
    if (term_length as u32).count_ones() != 1 {
        return Err(Error::ResourceMapping(format!(
            "term length {term_length} is not a power of two"
        )));
    }
    Ok(())
}

/// Check a page size against the supported range.
///
/// # Errors
///
/// `ResourceMapping` if out of range or not a power of two.
pub fn check_page_size(page_size: i32) -> Result<()> {
    if !(PAGE_MIN_SIZE..=PAGE_MAX_SIZE).contains(&page_size) {
        return Err(Error::ResourceMapping(format!(
            "page size {page_size} outside [{PAGE_MIN_SIZE}, {PAGE_MAX_SIZE}]"
        )));
    }
    if (page_size as u32).count_ones() != 1 {
        return Err(Error::ResourceMapping(format!(
            "page size {page_size} is not a power of two"
        )));
    }
    Ok(())
}

/// Metadata a driver writes into a fresh log (driver side and tests).
#[derive(Clone, Copy, Debug)]
pub struct LogParams {
    pub term_length: i32,
    pub page_size: i32,
    pub initial_term_id: i32,
    pub mtu: i32,
    pub correlation_id: i64,
}

impl Default for LogParams {
    fn default() -> Self {
        Self {
            term_length: TERM_MIN_LENGTH,
            page_size: PAGE_MIN_SIZE,
            initial_term_id: 0,
            mtu: 1408,
            correlation_id: 0,
        }
    }
}

/// Create a log file at `path` and fill its metadata.
///
/// # Errors
///
/// `ResourceMapping` for invalid parameters, `Io` if the file cannot be created.
pub fn create_log(path: &Path, params: &LogParams) -> Result<()> {
    check_term_length(params.term_length)?;
    check_page_size(params.page_size)?;

    let length = compute_log_length(params.term_length, params.page_size);
    let file = MappedFile::create(path, length)?;
    let metadata = file
        .buffer()
        .view(length - LOG_META_DATA_LENGTH, LOG_META_DATA_LENGTH);

    metadata.put_i64(LOG_CORRELATION_ID_OFFSET, params.correlation_id);
    metadata.put_i32(LOG_INITIAL_TERM_ID_OFFSET, params.initial_term_id);
    metadata.put_i32(LOG_MTU_LENGTH_OFFSET, params.mtu);
    metadata.put_i32(LOG_PAGE_SIZE_OFFSET, params.page_size);
    metadata.put_i32_ordered(LOG_TERM_LENGTH_OFFSET, params.term_length);
    Ok(())
}

/// Outcome of a mapping attempt.
#[derive(Debug)]
pub enum LogMapping {
    Ready(LogBuffers),
    /// File missing, short, or metadata not written yet.
    NotReady,
}

/// Mapped log: three term buffers plus metadata.
#[derive(Debug)]
pub struct LogBuffers {
    file: MappedFile,
    term_length: i32,
    page_size: i32,
    initial_term_id: i32,
    mtu: i32,
    correlation_id: i64,
}

impl LogBuffers {
    /// Try to map and validate the log at `path` without blocking.
    ///
    /// # Errors
    ///
    /// `ResourceMapping` when the file carries inconsistent metadata, `Io`
    /// when the file exists but cannot be opened or mapped.
    pub fn try_map(path: &Path) -> Result<LogMapping> {
        let file = match MappedFile::try_map(path, MIN_LOG_LENGTH as u64)? {
            MapOutcome::Mapped(file) => file,
            MapOutcome::NotFound => {
                log::debug!("[log-buffers] {} not present yet", path.display());
                return Ok(LogMapping::NotReady);
            }
            MapOutcome::SizeMismatch { actual, expected } => {
                log::debug!(
                    "[log-buffers] {} is {} bytes, need at least {}",
                    path.display(),
                    actual,
                    expected
                );
                return Ok(LogMapping::NotReady);
            }
        };

        let metadata = file
            .buffer()
            .view(file.len() - LOG_META_DATA_LENGTH, LOG_META_DATA_LENGTH);
        let term_length = metadata.get_i32_volatile(LOG_TERM_LENGTH_OFFSET);
        let page_size = metadata.get_i32(LOG_PAGE_SIZE_OFFSET);

        if term_length == 0 || page_size == 0 {
            log::debug!("[log-buffers] {} metadata not written yet", path.display());
            return Ok(LogMapping::NotReady);
        }

        check_term_length(term_length)?;
        check_page_size(page_size)?;

        let expected = compute_log_length(term_length, page_size);
        if file.len() != expected {
            return Err(Error::ResourceMapping(format!(
                "{}: length {} does not match term length {} and page size {} (expected {})",
                path.display(),
                file.len(),
                term_length,
                page_size,
                expected
            )));
        }

        log::debug!(
            "[log-buffers] mapped {} term_length={} page_size={}",
            path.display(),
            term_length,
            page_size
        );

        Ok(LogMapping::Ready(Self {
            initial_term_id: metadata.get_i32(LOG_INITIAL_TERM_ID_OFFSET),
            mtu: metadata.get_i32(LOG_MTU_LENGTH_OFFSET),
            correlation_id: metadata.get_i64(LOG_CORRELATION_ID_OFFSET),
            file,
            term_length,
            page_size,
        }))
    }

    #[must_use]
    pub fn term_length(&self) -> i32 {
        self.term_length
    }

    #[must_use]
    pub fn page_size(&self) -> i32 {
        self.page_size
    }

    #[must_use]
    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    #[must_use]
    pub fn mtu(&self) -> i32 {
        self.mtu
    }

    /// Correlation id the driver stamped into the log.
    #[must_use]
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Term partition `index` (0..3).
    ///
    /// # Panics
    ///
    /// Panics if `index >= PARTITION_COUNT`.
    #[must_use]
    pub fn term_buffer(&self, index: usize) -> AtomicBuffer {
        assert!(index < PARTITION_COUNT, "partition index {index} out of range");
        let term_length = self.term_length as usize;
        self.file.buffer().view(index * term_length, term_length)
    }

    #[must_use]
    pub fn metadata_buffer(&self) -> AtomicBuffer {
        self.file
            .buffer()
            .view(self.file.len() - LOG_META_DATA_LENGTH, LOG_META_DATA_LENGTH)
    }

    #[must_use]
    pub fn active_term_count(&self) -> i32 {
        self.metadata_buffer()
            .get_i32_volatile(LOG_ACTIVE_TERM_COUNT_OFFSET)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.metadata_buffer().get_i32_volatile(LOG_IS_CONNECTED_OFFSET) == 1
    }
}
