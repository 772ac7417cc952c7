// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-plane records exchanged with the driver.
//!
//! Commands travel client→driver over the ring buffer, responses travel
//! driver→clients over the broadcast buffer. Every record is little-endian;
//! strings are an `i32` length followed by UTF-8 bytes.
//!
//! Decoding never fails loudly: a truncated or unknown record decodes to
//! `None` and is skipped by the conductor.

pub mod command;
pub mod response;

pub use command::Command;
pub use response::{ImageReady, PublicationReady, Response};

// ============================================================================
// Command type ids (client → driver)
// ============================================================================

pub const ADD_PUBLICATION: i32 = 0x01;
pub const REMOVE_PUBLICATION: i32 = 0x02;
pub const ADD_EXCLUSIVE_PUBLICATION: i32 = 0x03;
pub const ADD_SUBSCRIPTION: i32 = 0x04;
pub const REMOVE_SUBSCRIPTION: i32 = 0x05;
pub const CLIENT_KEEPALIVE: i32 = 0x06;
pub const ADD_COUNTER: i32 = 0x09;
pub const REMOVE_COUNTER: i32 = 0x0A;
pub const CLIENT_CLOSE: i32 = 0x0B;

// ============================================================================
// Response type ids (driver → clients)
// ============================================================================

pub const ON_ERROR: i32 = 0x0F01;
pub const ON_AVAILABLE_IMAGE: i32 = 0x0F02;
pub const ON_PUBLICATION_READY: i32 = 0x0F03;
pub const ON_OPERATION_SUCCESS: i32 = 0x0F04;
pub const ON_UNAVAILABLE_IMAGE: i32 = 0x0F05;
pub const ON_EXCLUSIVE_PUBLICATION_READY: i32 = 0x0F06;
pub const ON_SUBSCRIPTION_READY: i32 = 0x0F07;
pub const ON_COUNTER_READY: i32 = 0x0F08;
pub const ON_UNAVAILABLE_COUNTER: i32 = 0x0F09;
pub const ON_CLIENT_TIMEOUT: i32 = 0x0F0A;

/// Generate little-endian append methods.
macro_rules! impl_put_le {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) -> &mut Self {
            self.buffer.extend_from_slice(&value.to_le_bytes());
            self
        }
    };
}

/// Generate bounds-checked little-endian read methods.
macro_rules! impl_get_le {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> Option<$type> {
            let end = self.offset.checked_add($size)?;
            let slice = self.buffer.get(self.offset..end)?;
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(slice);
            self.offset = end;
            Some(<$type>::from_le_bytes(bytes))
        }
    };
}

/// Growable record writer.
#[derive(Debug, Default)]
pub struct RecordWriter {
    buffer: Vec<u8>,
}

impl RecordWriter {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    impl_put_le!(put_i32, i32);
    impl_put_le!(put_i64, i64);

    /// Length-prefixed byte string.
    pub fn put_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.put_i32(data.len() as i32);
        self.buffer.extend_from_slice(data);
        self
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    /// Zero-pad to a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) -> &mut Self {
        let padded = crate::concurrent::align(self.buffer.len(), alignment);
        self.buffer.resize(padded, 0);
        self
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// Bounds-checked record reader.
#[derive(Debug)]
pub struct RecordReader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    #[must_use]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    impl_get_le!(get_i32, i32, 4);
    impl_get_le!(get_i64, i64, 8);

    /// Length-prefixed byte string.
    pub fn get_bytes(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.get_i32()?).ok()?;
        let end = self.offset.checked_add(len)?;
        let slice = self.buffer.get(self.offset..end)?;
        self.offset = end;
        Some(slice)
    }

    pub fn get_string(&mut self) -> Option<String> {
        let bytes = self.get_bytes()?;
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }

    pub fn align(&mut self, alignment: usize) -> Option<()> {
        let aligned = crate::concurrent::align(self.offset, alignment);
        if aligned > self.buffer.len() {
            return None;
        }
        self.offset = aligned;
        Some(())
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }
}
