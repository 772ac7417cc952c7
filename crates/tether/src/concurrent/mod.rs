// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory message queues between client and driver.
//!
//! ```text
//! +------------------+                         +------------------+
//! |   Client         |   ManyToOneRingBuffer   |   Driver         |
//! |   DriverProxy ---+------------------------>+-> command loop   |
//! |                  |                         |                  |
//! |   Conductor   <--+-------------------------+-- Transmitter    |
//! +------------------+   Broadcast buffer      +------------------+
//! ```
//!
//! Both queues carry length-prefixed records with an 8-byte header:
//!
//! ```text
//! 0        4        8
//! +--------+--------+---------------------------+
//! | length |  type  | payload (length - 8)      |
//! +--------+--------+---------------------------+
//! ```
//!
//! Records are aligned to 8 bytes; a record of type [`PADDING_MSG_TYPE_ID`]
//! fills the gap at the end of the buffer when a record would wrap.

mod atomic_buffer;
pub mod broadcast;
pub mod ring_buffer;

pub use atomic_buffer::{AlignedBuffer, AtomicBuffer};
pub use broadcast::{BroadcastReceiver, BroadcastTransmitter, CopyBroadcastReceiver};
pub use ring_buffer::ManyToOneRingBuffer;

/// Cache line size used to separate hot trailer counters.
pub const CACHE_LINE_LENGTH: usize = 64;

/// Length of a record header.
pub const HEADER_LENGTH: usize = 8;

/// Alignment of records within the buffer.
pub const RECORD_ALIGNMENT: usize = 8;

/// Type id of padding records.
pub const PADDING_MSG_TYPE_ID: i32 = -1;

/// Offset of the length field for a record at `record_offset`.
#[inline]
#[must_use]
pub const fn length_offset(record_offset: usize) -> usize {
    record_offset
}

/// Offset of the type field for a record at `record_offset`.
#[inline]
#[must_use]
pub const fn type_offset(record_offset: usize) -> usize {
    record_offset + 4
}

/// Offset of the payload for a record at `record_offset`.
#[inline]
#[must_use]
pub const fn encoded_msg_offset(record_offset: usize) -> usize {
    record_offset + HEADER_LENGTH
}

/// Round `value` up to a multiple of `alignment` (a power of two).
#[inline]
#[must_use]
pub const fn align(value: usize, alignment: usize) -> usize {
    (value + (alignment - 1)) & !(alignment - 1)
}

/// Pack a record header into a single 64-bit word (length low, type high).
#[inline]
#[must_use]
pub fn make_header(length: i32, msg_type_id: i32) -> i64 {
    (i64::from(msg_type_id) << 32) | (i64::from(length) & 0xFFFF_FFFF)
}
