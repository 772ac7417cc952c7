// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-to-many broadcast buffer for driver-to-client responses.
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------+
//! | Records (capacity bytes, power of 2)                        |
//! +-------------------------------------------------------------+
//! | Trailer (128 bytes)                                         |
//! |   +0   tail intent counter                                  |
//! |   +8   tail counter                                         |
//! |   +16  latest counter (start of most recent record)         |
//! +-------------------------------------------------------------+
//! ```
//!
//! The transmitter never waits for receivers. A receiver that falls more than
//! `capacity` bytes behind is *lapped*: it detects this through the tail intent
//! counter, jumps to the latest record and reports the loss.

use super::{
    align, encoded_msg_offset, length_offset, type_offset, AtomicBuffer, CACHE_LINE_LENGTH,
    HEADER_LENGTH, PADDING_MSG_TYPE_ID, RECORD_ALIGNMENT,
};
use crate::error::{Error, Result};
use std::sync::atomic::{fence, Ordering};

/// Offset of the tail intent counter within the trailer.
pub const TAIL_INTENT_COUNTER_OFFSET: usize = 0;
/// Offset of the tail counter within the trailer.
pub const TAIL_COUNTER_OFFSET: usize = 8;
/// Offset of the latest record counter within the trailer.
pub const LATEST_COUNTER_OFFSET: usize = 16;
/// Total trailer length.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

fn data_capacity(buffer: &AtomicBuffer) -> Result<usize> {
    let capacity = buffer
        .capacity()
        .checked_sub(TRAILER_LENGTH)
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "broadcast buffer length {} smaller than trailer {TRAILER_LENGTH}",
                buffer.capacity()
            ))
        })?;
    if !capacity.is_power_of_two() {
        return Err(Error::InvalidArgument(format!(
            "broadcast buffer capacity must be a power of 2: {capacity}"
        )));
    }
    Ok(capacity)
}

/// Single producer of broadcast records (driver side).
#[derive(Debug)]
pub struct BroadcastTransmitter {
    buffer: AtomicBuffer,
    capacity: usize,
    max_msg_length: usize,
    tail_intent_counter_index: usize,
    tail_counter_index: usize,
    latest_counter_index: usize,
}

impl BroadcastTransmitter {
    /// Wrap a region of `capacity + TRAILER_LENGTH` bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the data capacity is not a power of two.
    pub fn new(buffer: AtomicBuffer) -> Result<Self> {
        let capacity = data_capacity(&buffer)?;
        Ok(Self {
            buffer,
            capacity,
            max_msg_length: capacity / 8,
            tail_intent_counter_index: capacity + TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + TAIL_COUNTER_OFFSET,
            latest_counter_index: capacity + LATEST_COUNTER_OFFSET,
        })
    }

    #[must_use]
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    /// Publish one record to every receiver.
    ///
    /// # Errors
    ///
    /// `MessageTooLarge` or `InvalidArgument` for a non-positive type id.
    pub fn transmit(&mut self, msg_type_id: i32, src: &[u8]) -> Result<()> {
        if msg_type_id < 1 {
            return Err(Error::InvalidArgument(format!(
                "message type id must be greater than zero: {msg_type_id}"
            )));
        }
        if src.len() > self.max_msg_length {
            return Err(Error::MessageTooLarge {
                length: src.len(),
                max: self.max_msg_length,
            });
        }

        let mut current_tail = self.buffer.get_i64(self.tail_counter_index);
        let mut record_offset = (current_tail & (self.capacity - 1) as i64) as usize;
        let record_length = src.len() + HEADER_LENGTH;
        let aligned_length = align(record_length, RECORD_ALIGNMENT);
        let new_tail = current_tail + aligned_length as i64;
        let to_end_of_buffer = self.capacity - record_offset;

        if to_end_of_buffer < aligned_length {
            self.signal_tail_intent(new_tail + to_end_of_buffer as i64);
            self.buffer
                .put_i32(length_offset(record_offset), to_end_of_buffer as i32);
            self.buffer
                .put_i32(type_offset(record_offset), PADDING_MSG_TYPE_ID);
            current_tail += to_end_of_buffer as i64;
            record_offset = 0;
        } else {
            self.signal_tail_intent(new_tail);
        }

        self.buffer
            .put_i32(length_offset(record_offset), record_length as i32);
        self.buffer.put_i32(type_offset(record_offset), msg_type_id);
        self.buffer.put_bytes(encoded_msg_offset(record_offset), src);

        self.buffer.put_i64(self.latest_counter_index, current_tail);
        self.buffer
            .put_i64_ordered(self.tail_counter_index, current_tail + aligned_length as i64);

        Ok(())
    }

    fn signal_tail_intent(&self, new_tail: i64) {
        self.buffer
            .put_i64_ordered(self.tail_intent_counter_index, new_tail);
        fence(Ordering::Release);
    }
}

/// Cursor over a broadcast buffer (client side).
#[derive(Debug)]
pub struct BroadcastReceiver {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: i64,
    tail_intent_counter_index: usize,
    tail_counter_index: usize,
    latest_counter_index: usize,
    record_offset: usize,
    cursor: i64,
    next_record: i64,
    lapped_count: u64,
}

impl BroadcastReceiver {
    /// Attach to a broadcast buffer, starting at the most recent record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the data capacity is not a power of two.
    pub fn new(buffer: AtomicBuffer) -> Result<Self> {
        let capacity = data_capacity(&buffer)?;
        let mask = (capacity - 1) as i64;
        let latest_counter_index = capacity + LATEST_COUNTER_OFFSET;
        let cursor = buffer.get_i64(latest_counter_index);

        Ok(Self {
            buffer,
            capacity,
            mask,
            tail_intent_counter_index: capacity + TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + TAIL_COUNTER_OFFSET,
            latest_counter_index,
            record_offset: (cursor & mask) as usize,
            cursor,
            next_record: cursor,
            lapped_count: 0,
        })
    }

    /// Number of times the transmitter has lapped this receiver.
    #[must_use]
    pub fn lapped_count(&self) -> u64 {
        self.lapped_count
    }

    /// Type id of the current record.
    #[must_use]
    pub fn type_id(&self) -> i32 {
        self.buffer.get_i32(type_offset(self.record_offset))
    }

    /// Offset of the current record's payload.
    #[must_use]
    pub fn offset(&self) -> usize {
        encoded_msg_offset(self.record_offset)
    }

    /// Payload length of the current record.
    #[must_use]
    pub fn length(&self) -> usize {
        let record_length = self.buffer.get_i32(length_offset(self.record_offset));
        (record_length.max(HEADER_LENGTH as i32) as usize) - HEADER_LENGTH
    }

    /// Underlying buffer, for copying the current payload.
    #[must_use]
    pub fn buffer(&self) -> &AtomicBuffer {
        &self.buffer
    }

    /// Advance to the next record. Returns `false` when none is available.
    pub fn receive_next(&mut self) -> bool {
        let tail = self.buffer.get_i64_volatile(self.tail_counter_index);
        let mut cursor = self.next_record;

        if tail <= cursor {
            return false;
        }

        let mut record_offset = (cursor & self.mask) as usize;
        if !self.validate_at(cursor) {
            self.lapped_count += 1;
            cursor = self.buffer.get_i64(self.latest_counter_index);
            record_offset = (cursor & self.mask) as usize;
        }

        self.cursor = cursor;
        self.next_record = cursor + self.aligned_record_length(record_offset);

        if self.buffer.get_i32(type_offset(record_offset)) == PADDING_MSG_TYPE_ID {
            record_offset = 0;
            self.cursor = self.next_record;
            self.next_record += self.aligned_record_length(record_offset);
        }

        self.record_offset = record_offset;
        true
    }

    /// Whether the current record is still intact (not overwritten).
    #[must_use]
    pub fn validate(&self) -> bool {
        fence(Ordering::Acquire);
        self.validate_at(self.cursor)
    }

    fn validate_at(&self, cursor: i64) -> bool {
        cursor + self.capacity as i64
            > self.buffer.get_i64_volatile(self.tail_intent_counter_index)
    }

    fn aligned_record_length(&self, record_offset: usize) -> i64 {
        let length = self.buffer.get_i32(length_offset(record_offset));
        align(length.max(HEADER_LENGTH as i32) as usize, RECORD_ALIGNMENT) as i64
    }
}

/// Receiver that copies each record out before handing it to the caller, and
/// re-validates after the copy so a torn record is never delivered.
#[derive(Debug)]
pub struct CopyBroadcastReceiver {
    receiver: BroadcastReceiver,
    scratch: Vec<u8>,
}

impl CopyBroadcastReceiver {
    #[must_use]
    pub fn new(receiver: BroadcastReceiver) -> Self {
        let scratch = vec![0u8; receiver.capacity / 8];
        Self { receiver, scratch }
    }

    /// Deliver at most one record to `handler(type_id, payload)`.
    ///
    /// Returns the number of records delivered (0 or 1).
    ///
    /// # Errors
    ///
    /// `BroadcastLapped` if records were lost before or during the copy.
    pub fn receive<F>(&mut self, mut handler: F) -> Result<usize>
    where
        F: FnMut(i32, &[u8]),
    {
        let last_seen_lapped_count = self.receiver.lapped_count();

        if !self.receiver.receive_next() {
            return Ok(0);
        }

        if last_seen_lapped_count != self.receiver.lapped_count() {
            return Err(Error::BroadcastLapped);
        }

        let length = self.receiver.length();
        if length > self.scratch.len() {
            return Err(Error::InvalidArgument(format!(
                "broadcast record of {length} bytes exceeds scratch {}",
                self.scratch.len()
            )));
        }

        let msg_type_id = self.receiver.type_id();
        let offset = self.receiver.offset();
        self.receiver
            .buffer()
            .get_bytes(offset, &mut self.scratch[..length]);

        if !self.receiver.validate() {
            return Err(Error::BroadcastLapped);
        }

        handler(msg_type_id, &self.scratch[..length]);
        Ok(1)
    }
}
