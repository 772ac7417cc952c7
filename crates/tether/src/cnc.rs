// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command-and-control (CnC) region shared with the driver.
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------+
//! | Header (128 bytes)                                          |
//! |   +0   cnc_version            i32 (written last, Release)   |
//! |   +4   to_driver_length       i32                           |
//! |   +8   to_clients_length      i32                           |
//! |   +12  counter_metadata_len   i32                           |
//! |   +16  counter_values_len     i32                           |
//! |   +20  error_log_length       i32                           |
//! |   +24  client_liveness_ns     i64                           |
//! |   +32  start_timestamp_ms     i64                           |
//! |   +40  driver pid             i64                           |
//! +-------------------------------------------------------------+
//! | to-driver ring buffer                                       |
//! | to-clients broadcast buffer                                 |
//! | counter metadata                                            |
//! | counter values (128-byte slot per counter id)               |
//! | error log                                                   |
//! +-------------------------------------------------------------+
//! ```
//!
//! A version of zero means the driver is still initialising the region.

use crate::concurrent::{align, AlignedBuffer, AtomicBuffer, CACHE_LINE_LENGTH};
use crate::error::{Error, Result};
use crate::mapped::{MapOutcome, MappedFile};
use std::path::Path;
use std::sync::Arc;

pub const CNC_VERSION_OFFSET: usize = 0;
pub const TO_DRIVER_BUFFER_LENGTH_OFFSET: usize = 4;
pub const TO_CLIENTS_BUFFER_LENGTH_OFFSET: usize = 8;
pub const COUNTER_METADATA_BUFFER_LENGTH_OFFSET: usize = 12;
pub const COUNTER_VALUES_BUFFER_LENGTH_OFFSET: usize = 16;
pub const ERROR_LOG_BUFFER_LENGTH_OFFSET: usize = 20;
pub const CLIENT_LIVENESS_TIMEOUT_OFFSET: usize = 24;
pub const START_TIMESTAMP_OFFSET: usize = 32;
pub const PID_OFFSET: usize = 40;

/// Header length, padded to two cache lines.
pub const META_DATA_LENGTH: usize = align(PID_OFFSET + 8, CACHE_LINE_LENGTH * 2);

/// Bytes reserved for each counter in the values section.
pub const COUNTER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

/// Compose a semantic version into the on-disk representation.
#[must_use]
pub const fn semantic_version(major: u8, minor: u8, patch: u8) -> i32 {
    ((major as i32) << 16) | ((minor as i32) << 8) | (patch as i32)
}

#[must_use]
pub const fn version_major(version: i32) -> u8 {
    ((version >> 16) & 0xFF) as u8
}

/// `major.minor.patch` rendering of an encoded version.
#[must_use]
pub fn format_version(version: i32) -> String {
    format!(
        "{}.{}.{}",
        version_major(version),
        (version >> 8) & 0xFF,
        version & 0xFF
    )
}

/// Version understood by this client. Only the major component must match.
pub const CNC_VERSION: i32 = semantic_version(0, 2, 0);

/// Section sizes written into the CnC header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CncLayout {
    pub to_driver_buffer_length: usize,
    pub to_clients_buffer_length: usize,
    pub counter_metadata_buffer_length: usize,
    pub counter_values_buffer_length: usize,
    pub error_log_buffer_length: usize,
}

impl CncLayout {
    /// Total region length rounded up to `page_size`.
    #[must_use]
    pub fn computed_length(&self, page_size: usize) -> usize {
        align(
            META_DATA_LENGTH
                + self.to_driver_buffer_length
                + self.to_clients_buffer_length
                + self.counter_metadata_buffer_length
                + self.counter_values_buffer_length
                + self.error_log_buffer_length,
            page_size,
        )
    }

    fn sections_length(&self) -> usize {
        META_DATA_LENGTH
            + self.to_driver_buffer_length
            + self.to_clients_buffer_length
            + self.counter_metadata_buffer_length
            + self.counter_values_buffer_length
            + self.error_log_buffer_length
    }
}

/// Write a CnC header into `buffer` (driver side).
///
/// The version is stored last with Release ordering so a client never sees
/// a valid version with incomplete section lengths.
///
/// # Errors
///
/// Returns `InvalidArgument` if the buffer is smaller than the layout.
pub fn initialise(
    buffer: &AtomicBuffer,
    layout: &CncLayout,
    client_liveness_timeout_ns: i64,
    start_timestamp_ms: i64,
    pid: i64,
) -> Result<()> {
    if buffer.capacity() < layout.sections_length() {
        return Err(Error::InvalidArgument(format!(
            "CnC buffer of {} bytes cannot hold layout of {} bytes",
            buffer.capacity(),
            layout.sections_length()
        )));
    }

    buffer.put_i32(TO_DRIVER_BUFFER_LENGTH_OFFSET, layout.to_driver_buffer_length as i32);
    buffer.put_i32(TO_CLIENTS_BUFFER_LENGTH_OFFSET, layout.to_clients_buffer_length as i32);
    buffer.put_i32(
        COUNTER_METADATA_BUFFER_LENGTH_OFFSET,
        layout.counter_metadata_buffer_length as i32,
    );
    buffer.put_i32(
        COUNTER_VALUES_BUFFER_LENGTH_OFFSET,
        layout.counter_values_buffer_length as i32,
    );
    buffer.put_i32(ERROR_LOG_BUFFER_LENGTH_OFFSET, layout.error_log_buffer_length as i32);
    buffer.put_i64(CLIENT_LIVENESS_TIMEOUT_OFFSET, client_liveness_timeout_ns);
    buffer.put_i64(START_TIMESTAMP_OFFSET, start_timestamp_ms);
    buffer.put_i64(PID_OFFSET, pid);
    buffer.put_i32_ordered(CNC_VERSION_OFFSET, CNC_VERSION);
    Ok(())
}

#[derive(Debug)]
#[allow(dead_code)] // Held only to keep the mapping alive
enum Backing {
    Mapped(MappedFile),
    Heap(Arc<AlignedBuffer>),
}

/// Validated view of a CnC region.
///
/// Owns (or shares) the backing memory, so every section view stays valid
/// while the `Cnc` is alive.
#[derive(Debug)]
pub struct Cnc {
    _backing: Backing,
    to_driver: AtomicBuffer,
    to_clients: AtomicBuffer,
    counter_metadata: AtomicBuffer,
    counter_values: AtomicBuffer,
    error_log: AtomicBuffer,
    client_liveness_timeout_ns: i64,
    start_timestamp_ms: i64,
    pid: i64,
}

impl Cnc {
    /// Map and validate the CnC file at `path`.
    ///
    /// # Errors
    ///
    /// `CncNotReady` while the file is missing, short, or still being
    /// initialised (retryable), `CncVersionMismatch` for an incompatible
    /// driver, `Io` if the file cannot be mapped.
    pub fn map_file(path: &Path) -> Result<Self> {
        let file = match MappedFile::try_map(path, META_DATA_LENGTH as u64)? {
            MapOutcome::Mapped(file) => file,
            MapOutcome::NotFound | MapOutcome::SizeMismatch { .. } => {
                return Err(Error::CncNotReady)
            }
        };
        let buffer = file.buffer();
        Self::validate(Backing::Mapped(file), buffer)
    }

    /// Attach to an in-process region (tests, embedded drivers).
    ///
    /// # Errors
    ///
    /// Same as [`map_file`](Self::map_file), minus I/O.
    pub fn from_heap(region: Arc<AlignedBuffer>) -> Result<Self> {
        let buffer = region.atomic_buffer();
        Self::validate(Backing::Heap(region), buffer)
    }

    fn validate(backing: Backing, buffer: AtomicBuffer) -> Result<Self> {
        let version = buffer.get_i32_volatile(CNC_VERSION_OFFSET);
        if version == 0 {
            return Err(Error::CncNotReady);
        }
        if version_major(version) != version_major(CNC_VERSION) {
            return Err(Error::CncVersionMismatch {
                expected: CNC_VERSION,
                actual: version,
            });
        }

        let length = |offset: usize| -> Result<usize> {
            usize::try_from(buffer.get_i32(offset)).map_err(|_| {
                Error::InvalidArgument(format!("negative CnC section length at offset {offset}"))
            })
        };
        let layout = CncLayout {
            to_driver_buffer_length: length(TO_DRIVER_BUFFER_LENGTH_OFFSET)?,
            to_clients_buffer_length: length(TO_CLIENTS_BUFFER_LENGTH_OFFSET)?,
            counter_metadata_buffer_length: length(COUNTER_METADATA_BUFFER_LENGTH_OFFSET)?,
            counter_values_buffer_length: length(COUNTER_VALUES_BUFFER_LENGTH_OFFSET)?,
            error_log_buffer_length: length(ERROR_LOG_BUFFER_LENGTH_OFFSET)?,
        };
        if layout.sections_length() > buffer.capacity() {
            return Err(Error::InvalidArgument(format!(
                "CnC sections need {} bytes, region has {}",
                layout.sections_length(),
                buffer.capacity()
            )));
        }

        let mut offset = META_DATA_LENGTH;
        let mut section = |len: usize| {
            let view = buffer.view(offset, len);
            offset += len;
            view
        };
        let to_driver = section(layout.to_driver_buffer_length);
        let to_clients = section(layout.to_clients_buffer_length);
        let counter_metadata = section(layout.counter_metadata_buffer_length);
        let counter_values = section(layout.counter_values_buffer_length);
        let error_log = section(layout.error_log_buffer_length);

        Ok(Self {
            _backing: backing,
            to_driver,
            to_clients,
            counter_metadata,
            counter_values,
            error_log,
            client_liveness_timeout_ns: buffer.get_i64(CLIENT_LIVENESS_TIMEOUT_OFFSET),
            start_timestamp_ms: buffer.get_i64(START_TIMESTAMP_OFFSET),
            pid: buffer.get_i64(PID_OFFSET),
        })
    }

    #[must_use]
    pub fn to_driver_buffer(&self) -> AtomicBuffer {
        self.to_driver
    }

    #[must_use]
    pub fn to_clients_buffer(&self) -> AtomicBuffer {
        self.to_clients
    }

    #[must_use]
    pub fn counter_metadata_buffer(&self) -> AtomicBuffer {
        self.counter_metadata
    }

    #[must_use]
    pub fn counter_values_buffer(&self) -> AtomicBuffer {
        self.counter_values
    }

    #[must_use]
    pub fn error_log_buffer(&self) -> AtomicBuffer {
        self.error_log
    }

    /// Liveness timeout the driver applies to this client.
    #[must_use]
    pub fn client_liveness_timeout_ns(&self) -> i64 {
        self.client_liveness_timeout_ns
    }

    #[must_use]
    pub fn start_timestamp_ms(&self) -> i64 {
        self.start_timestamp_ms
    }

    #[must_use]
    pub fn pid(&self) -> i64 {
        self.pid
    }

    fn counter_offset(&self, counter_id: i32) -> Result<usize> {
        let id = usize::try_from(counter_id)
            .map_err(|_| Error::InvalidArgument(format!("invalid counter id {counter_id}")))?;
        let offset = id * COUNTER_LENGTH;
        if offset + COUNTER_LENGTH > self.counter_values.capacity() {
            return Err(Error::InvalidArgument(format!(
                "counter id {counter_id} outside values buffer"
            )));
        }
        Ok(offset)
    }

    /// Current value of a counter.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an id outside the values section.
    pub fn counter_value(&self, counter_id: i32) -> Result<i64> {
        let offset = self.counter_offset(counter_id)?;
        Ok(self.counter_values.get_i64_volatile(offset))
    }

    /// Store a counter value.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an id outside the values section.
    pub fn set_counter_value(&self, counter_id: i32, value: i64) -> Result<()> {
        let offset = self.counter_offset(counter_id)?;
        self.counter_values.put_i64_ordered(offset, value);
        Ok(())
    }

    /// Add to a counter, returning the previous value.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an id outside the values section.
    pub fn add_counter_value(&self, counter_id: i32, delta: i64) -> Result<i64> {
        let offset = self.counter_offset(counter_id)?;
        Ok(self.counter_values.get_and_add_i64(offset, delta))
    }
}
