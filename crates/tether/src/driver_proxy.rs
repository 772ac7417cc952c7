// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command channel writer.
//!
//! Encodes [`Command`] records onto the client→driver ring buffer. Writes
//! never block: a full channel is returned as [`Error::ChannelFull`] and the
//! caller decides whether to retry.
//!
//! Correlation ids come from the ring buffer's shared counter, so ids are
//! unique across every client attached to the same driver.

use crate::concurrent::ManyToOneRingBuffer;
use crate::error::Result;
use crate::protocol::Command;

#[cfg(doc)]
use crate::error::Error;

/// Thread-safe writer for driver commands.
#[derive(Debug)]
pub struct DriverProxy {
    ring: ManyToOneRingBuffer,
    client_id: i64,
}

impl DriverProxy {
    /// Wrap the to-driver ring buffer, drawing this client's id from it.
    #[must_use]
    pub fn new(ring: ManyToOneRingBuffer) -> Self {
        let client_id = ring.next_correlation_id();
        log::debug!("[driver-proxy] client_id={}", client_id);
        Self { ring, client_id }
    }

    #[must_use]
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Allocate a fresh correlation id.
    #[must_use]
    pub fn next_correlation_id(&self) -> i64 {
        self.ring.next_correlation_id()
    }

    /// Epoch milliseconds of the driver's last heartbeat.
    #[must_use]
    pub fn time_of_last_driver_keepalive_ms(&self) -> i64 {
        self.ring.consumer_heartbeat_time()
    }

    /// # Errors
    ///
    /// `ChannelFull` or `MessageTooLarge` from the ring buffer.
    pub fn add_publication(&self, correlation_id: i64, channel: &str, stream_id: i32) -> Result<()> {
        self.write(&Command::AddPublication {
            client_id: self.client_id,
            correlation_id,
            stream_id,
            channel: channel.to_string(),
        })
    }

    /// # Errors
    ///
    /// `ChannelFull` or `MessageTooLarge` from the ring buffer.
    pub fn add_exclusive_publication(
        &self,
        correlation_id: i64,
        channel: &str,
        stream_id: i32,
    ) -> Result<()> {
        self.write(&Command::AddExclusivePublication {
            client_id: self.client_id,
            correlation_id,
            stream_id,
            channel: channel.to_string(),
        })
    }

    /// # Errors
    ///
    /// `ChannelFull` or `MessageTooLarge` from the ring buffer.
    pub fn add_subscription(&self, correlation_id: i64, channel: &str, stream_id: i32) -> Result<()> {
        self.write(&Command::AddSubscription {
            client_id: self.client_id,
            correlation_id,
            stream_id,
            channel: channel.to_string(),
        })
    }

    /// # Errors
    ///
    /// `ChannelFull` or `MessageTooLarge` from the ring buffer.
    pub fn add_counter(
        &self,
        correlation_id: i64,
        type_id: i32,
        key: &[u8],
        label: &str,
    ) -> Result<()> {
        self.write(&Command::AddCounter {
            client_id: self.client_id,
            correlation_id,
            type_id,
            key: key.to_vec(),
            label: label.to_string(),
        })
    }

    /// Ask the driver to release a publication. Returns the command's own
    /// correlation id.
    ///
    /// # Errors
    ///
    /// `ChannelFull` from the ring buffer.
    pub fn remove_publication(&self, registration_id: i64) -> Result<i64> {
        let correlation_id = self.next_correlation_id();
        self.write(&Command::RemovePublication {
            client_id: self.client_id,
            correlation_id,
            registration_id,
        })?;
        Ok(correlation_id)
    }

    /// # Errors
    ///
    /// `ChannelFull` from the ring buffer.
    pub fn remove_subscription(&self, registration_id: i64) -> Result<i64> {
        let correlation_id = self.next_correlation_id();
        self.write(&Command::RemoveSubscription {
            client_id: self.client_id,
            correlation_id,
            registration_id,
        })?;
        Ok(correlation_id)
    }

    /// # Errors
    ///
    /// `ChannelFull` from the ring buffer.
    pub fn remove_counter(&self, registration_id: i64) -> Result<i64> {
        let correlation_id = self.next_correlation_id();
        self.write(&Command::RemoveCounter {
            client_id: self.client_id,
            correlation_id,
            registration_id,
        })?;
        Ok(correlation_id)
    }

    /// # Errors
    ///
    /// `ChannelFull` from the ring buffer.
    pub fn send_client_keepalive(&self) -> Result<()> {
        self.write(&Command::ClientKeepalive {
            client_id: self.client_id,
        })
    }

    /// # Errors
    ///
    /// `ChannelFull` from the ring buffer.
    pub fn client_close(&self) -> Result<()> {
        self.write(&Command::ClientClose {
            client_id: self.client_id,
        })
    }

    fn write(&self, command: &Command) -> Result<()> {
        let payload = command.encode();
        self.ring.try_write(command.type_id(), &payload).map_err(|e| {
            log::debug!(
                "[driver-proxy] type=0x{:02X} correlation_id={} not written: {}",
                command.type_id(),
                command.correlation_id(),
                e
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::{ring_buffer, AlignedBuffer};
    use crate::error::Error;
    use crate::protocol::{ADD_PUBLICATION, REMOVE_COUNTER};

    fn proxy(capacity: usize) -> (AlignedBuffer, ManyToOneRingBuffer, DriverProxy) {
        let backing = AlignedBuffer::new(capacity + ring_buffer::TRAILER_LENGTH);
        let ring = ManyToOneRingBuffer::new(backing.atomic_buffer()).expect("ring");
        let proxy = DriverProxy::new(ring);
        (backing, ring, proxy)
    }

    #[test]
    fn test_client_id_drawn_first() {
        let (_backing, _ring, proxy) = proxy(1024);
        assert_eq!(proxy.client_id(), 0);
        assert_eq!(proxy.next_correlation_id(), 1);
    }

    #[test]
    fn test_commands_decode_on_driver_side() {
        let (_backing, ring, proxy) = proxy(1024);
        let id = proxy.next_correlation_id();
        proxy.add_publication(id, "aeron:ipc", 10).expect("add");
        let remove_id = proxy.remove_counter(77).expect("remove");

        let mut seen = Vec::new();
        ring.read(
            |type_id, bytes| seen.push(Command::decode(type_id, bytes).map(|c| (type_id, c))),
            10,
        );

        assert_eq!(seen.len(), 2);
        let (t0, c0) = seen[0].clone().expect("decode");
        assert_eq!(t0, ADD_PUBLICATION);
        assert_eq!(c0.correlation_id(), id);
        let (t1, c1) = seen[1].clone().expect("decode");
        assert_eq!(t1, REMOVE_COUNTER);
        assert_eq!(
            c1,
            Command::RemoveCounter {
                client_id: proxy.client_id(),
                correlation_id: remove_id,
                registration_id: 77,
            }
        );
    }

    #[test]
    fn test_full_channel_reported() {
        let (_backing, _ring, proxy) = proxy(256);
        let mut writes = 0;
        let err = loop {
            match proxy.send_client_keepalive() {
                Ok(()) => writes += 1,
                Err(e) => break e,
            }
            assert!(writes < 1000, "channel never filled");
        };
        assert!(matches!(err, Error::ChannelFull));
        assert!(writes > 0);
    }
}
