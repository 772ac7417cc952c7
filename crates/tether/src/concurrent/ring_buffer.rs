// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Many-producer, single-consumer ring buffer for client-to-driver commands.
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------+
//! | Records (capacity bytes, power of 2)                        |
//! +-------------------------------------------------------------+
//! | Trailer                                                     |
//! |   +0    tail position          (producers, CAS)             |
//! |   +64   head cache position    (producers)                  |
//! |   +128  head position          (consumer)                   |
//! |   +192  correlation counter    (any client)                 |
//! |   +256  consumer heartbeat     (consumer, epoch ms)         |
//! +-------------------------------------------------------------+
//! ```
//!
//! # Write Protocol
//!
//! 1. Claim `aligned_length` bytes by CAS on the tail (inserting a padding
//!    record first if the claim would wrap)
//! 2. Write the header with a negative length (record in progress)
//! 3. Copy the payload
//! 4. Store the positive length with Release ordering (commit)
//!
//! The consumer stops at the first record whose length is not positive, so a
//! half-written record is never observed.

use super::{
    align, encoded_msg_offset, length_offset, make_header, type_offset, AtomicBuffer,
    CACHE_LINE_LENGTH, HEADER_LENGTH, PADDING_MSG_TYPE_ID, RECORD_ALIGNMENT,
};
use crate::error::{Error, Result};

/// Offset of the tail position within the trailer.
pub const TAIL_POSITION_OFFSET: usize = 0;
/// Offset of the cached head position within the trailer.
pub const HEAD_CACHE_POSITION_OFFSET: usize = CACHE_LINE_LENGTH;
/// Offset of the head position within the trailer.
pub const HEAD_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 2;
/// Offset of the correlation id counter within the trailer.
pub const CORRELATION_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 3;
/// Offset of the consumer heartbeat timestamp within the trailer.
pub const CONSUMER_HEARTBEAT_OFFSET: usize = CACHE_LINE_LENGTH * 4;
/// Total trailer length.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 5;

/// Ring buffer over a shared region, safe for concurrent producers.
#[derive(Clone, Copy, Debug)]
pub struct ManyToOneRingBuffer {
    buffer: AtomicBuffer,
    capacity: usize,
    max_msg_length: usize,
    tail_position_index: usize,
    head_cache_position_index: usize,
    head_position_index: usize,
    correlation_id_counter_index: usize,
    consumer_heartbeat_index: usize,
}

impl ManyToOneRingBuffer {
    /// Wrap a region of `capacity + TRAILER_LENGTH` bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the data capacity is not a power of two.
    pub fn new(buffer: AtomicBuffer) -> Result<Self> {
        let capacity = buffer
            .capacity()
            .checked_sub(TRAILER_LENGTH)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "ring buffer length {} smaller than trailer {TRAILER_LENGTH}",
                    buffer.capacity()
                ))
            })?;
        if !capacity.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "ring buffer capacity must be a power of 2: {capacity}"
            )));
        }

        Ok(Self {
            buffer,
            capacity,
            max_msg_length: capacity / 8,
            tail_position_index: capacity + TAIL_POSITION_OFFSET,
            head_cache_position_index: capacity + HEAD_CACHE_POSITION_OFFSET,
            head_position_index: capacity + HEAD_POSITION_OFFSET,
            correlation_id_counter_index: capacity + CORRELATION_COUNTER_OFFSET,
            consumer_heartbeat_index: capacity + CONSUMER_HEARTBEAT_OFFSET,
        })
    }

    /// Data capacity in bytes (excluding the trailer).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload accepted by [`try_write`](Self::try_write).
    #[must_use]
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    /// Write one record without blocking.
    ///
    /// # Errors
    ///
    /// - `ChannelFull` if there is no room (caller may retry)
    /// - `MessageTooLarge` if `src` exceeds [`max_msg_length`](Self::max_msg_length)
    /// - `InvalidArgument` if `msg_type_id < 1`
    pub fn try_write(&self, msg_type_id: i32, src: &[u8]) -> Result<()> {
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

        let record_length = src.len() + HEADER_LENGTH;
        let required = align(record_length, RECORD_ALIGNMENT);
        let record_index = self.claim_capacity(required).ok_or(Error::ChannelFull)?;

        self.buffer.put_i64_ordered(
            record_index,
            make_header(-(record_length as i32), msg_type_id),
        );
        self.buffer.put_bytes(encoded_msg_offset(record_index), src);
        self.buffer
            .put_i32_ordered(length_offset(record_index), record_length as i32);

        Ok(())
    }

    fn claim_capacity(&self, required: usize) -> Option<usize> {
        let mask = (self.capacity - 1) as i64;
        let capacity = self.capacity as i64;
        let required_i = required as i64;

        let mut head = self.buffer.get_i64_volatile(self.head_cache_position_index);

        loop {
            let tail = self.buffer.get_i64_volatile(self.tail_position_index);
            let available = capacity - (tail - head);

            if required_i > available {
                head = self.buffer.get_i64_volatile(self.head_position_index);
                if required_i > capacity - (tail - head) {
                    return None;
                }
                self.buffer
                    .put_i64_ordered(self.head_cache_position_index, head);
            }

            let mut padding = 0i64;
            let tail_index = (tail & mask) as usize;
            let to_buffer_end = self.capacity - tail_index;

            if required > to_buffer_end {
                let mut head_index = (head & mask) as usize;

                if required > head_index {
                    head = self.buffer.get_i64_volatile(self.head_position_index);
                    head_index = (head & mask) as usize;
                    if required > head_index {
                        return None;
                    }
                    self.buffer
                        .put_i64_ordered(self.head_cache_position_index, head);
                }

                padding = to_buffer_end as i64;
            }

            if self.buffer.compare_and_set_i64(
                self.tail_position_index,
                tail,
                tail + required_i + padding,
            ) {
                if padding != 0 {
                    self.buffer.put_i64_ordered(
                        tail_index,
                        make_header(padding as i32, PADDING_MSG_TYPE_ID),
                    );
                    return Some(0);
                }
                return Some(tail_index);
            }
        }
    }

    /// Consume up to `limit` records, invoking `handler(type_id, payload)`.
    ///
    /// Consumer side only (driver, or a test harness standing in for it).
    /// Returns the number of records delivered.
    pub fn read<F>(&self, mut handler: F, limit: usize) -> usize
    where
        F: FnMut(i32, &[u8]),
    {
        let head = self.buffer.get_i64(self.head_position_index);
        let head_index = (head & (self.capacity - 1) as i64) as usize;
        let contiguous = self.capacity - head_index;
        let mut messages_read = 0;
        let mut bytes_read = 0;
        let mut scratch = Vec::new();

        while bytes_read < contiguous && messages_read < limit {
            let record_index = head_index + bytes_read;
            let record_length = self.buffer.get_i32_volatile(length_offset(record_index));
            if record_length <= 0 {
                break;
            }

            let record_length = record_length as usize;
            bytes_read += align(record_length, RECORD_ALIGNMENT);

            let msg_type_id = self.buffer.get_i32(type_offset(record_index));
            if msg_type_id == PADDING_MSG_TYPE_ID {
                continue;
            }

            scratch.resize(record_length - HEADER_LENGTH, 0);
            self.buffer
                .get_bytes(encoded_msg_offset(record_index), &mut scratch);
            messages_read += 1;
            handler(msg_type_id, &scratch);
        }

        if bytes_read > 0 {
            self.buffer.set_memory(head_index, bytes_read, 0);
            self.buffer
                .put_i64_ordered(self.head_position_index, head + bytes_read as i64);
        }

        messages_read
    }

    /// Draw the next id from the shared correlation counter.
    ///
    /// Ids are unique across every client attached to the same driver.
    pub fn next_correlation_id(&self) -> i64 {
        self.buffer
            .get_and_add_i64(self.correlation_id_counter_index, 1)
    }

    /// Consumer heartbeat in epoch milliseconds, as last written by the driver.
    #[must_use]
    pub fn consumer_heartbeat_time(&self) -> i64 {
        self.buffer.get_i64_volatile(self.consumer_heartbeat_index)
    }

    /// Record the consumer heartbeat (driver side).
    pub fn set_consumer_heartbeat_time(&self, epoch_ms: i64) {
        self.buffer
            .put_i64_ordered(self.consumer_heartbeat_index, epoch_ms);
    }

    /// Bytes currently written but not yet consumed.
    #[must_use]
    pub fn size(&self) -> usize {
        let head = self.buffer.get_i64_volatile(self.head_position_index);
        let tail = self.buffer.get_i64_volatile(self.tail_position_index);
        (tail - head).max(0) as usize
    }
}
