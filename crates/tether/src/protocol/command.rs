// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client→driver command records.
//!
//! ```text
//! correlated header   client_id i64 | correlation_id i64
//! publication         header | stream_id i32 | channel
//! subscription        header | registration_correlation_id i64 (-1) | stream_id i32 | channel
//! remove              header | registration_id i64
//! counter             header | type_id i32 | key (padded to 4) | label
//! ```

use super::{RecordReader, RecordWriter};
use super::{
    ADD_COUNTER, ADD_EXCLUSIVE_PUBLICATION, ADD_PUBLICATION, ADD_SUBSCRIPTION, CLIENT_CLOSE,
    CLIENT_KEEPALIVE, REMOVE_COUNTER, REMOVE_PUBLICATION, REMOVE_SUBSCRIPTION,
};

/// Control command sent to the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    AddPublication {
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: String,
    },
    AddExclusivePublication {
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: String,
    },
    AddSubscription {
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: String,
    },
    AddCounter {
        client_id: i64,
        correlation_id: i64,
        type_id: i32,
        key: Vec<u8>,
        label: String,
    },
    RemovePublication {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
    },
    RemoveSubscription {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
    },
    RemoveCounter {
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
    },
    ClientKeepalive {
        client_id: i64,
    },
    ClientClose {
        client_id: i64,
    },
}

impl Command {
    /// Ring buffer message type id.
    #[must_use]
    pub fn type_id(&self) -> i32 {
        match self {
            Self::AddPublication { .. } => ADD_PUBLICATION,
            Self::AddExclusivePublication { .. } => ADD_EXCLUSIVE_PUBLICATION,
            Self::AddSubscription { .. } => ADD_SUBSCRIPTION,
            Self::AddCounter { .. } => ADD_COUNTER,
            Self::RemovePublication { .. } => REMOVE_PUBLICATION,
            Self::RemoveSubscription { .. } => REMOVE_SUBSCRIPTION,
            Self::RemoveCounter { .. } => REMOVE_COUNTER,
            Self::ClientKeepalive { .. } => CLIENT_KEEPALIVE,
            Self::ClientClose { .. } => CLIENT_CLOSE,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> i64 {
        match self {
            Self::AddPublication { client_id, .. }
            | Self::AddExclusivePublication { client_id, .. }
            | Self::AddSubscription { client_id, .. }
            | Self::AddCounter { client_id, .. }
            | Self::RemovePublication { client_id, .. }
            | Self::RemoveSubscription { client_id, .. }
            | Self::RemoveCounter { client_id, .. }
            | Self::ClientKeepalive { client_id }
            | Self::ClientClose { client_id } => *client_id,
        }
    }

    /// Correlation id carried by the command (0 for keepalive and close).
    #[must_use]
    pub fn correlation_id(&self) -> i64 {
        match self {
            Self::AddPublication { correlation_id, .. }
            | Self::AddExclusivePublication { correlation_id, .. }
            | Self::AddSubscription { correlation_id, .. }
            | Self::AddCounter { correlation_id, .. }
            | Self::RemovePublication { correlation_id, .. }
            | Self::RemoveSubscription { correlation_id, .. }
            | Self::RemoveCounter { correlation_id, .. } => *correlation_id,
            Self::ClientKeepalive { .. } | Self::ClientClose { .. } => 0,
        }
    }

    /// Serialize the record payload (without the ring buffer header).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = RecordWriter::with_capacity(64);
        w.put_i64(self.client_id()).put_i64(self.correlation_id());

        match self {
            Self::AddPublication {
                stream_id, channel, ..
            }
            | Self::AddExclusivePublication {
                stream_id, channel, ..
            } => {
                w.put_i32(*stream_id).put_str(channel);
            }
            Self::AddSubscription {
                stream_id, channel, ..
            } => {
                w.put_i64(-1).put_i32(*stream_id).put_str(channel);
            }
            Self::AddCounter {
                type_id, key, label, ..
            } => {
                w.put_i32(*type_id).put_bytes(key).align(4).put_str(label);
            }
            Self::RemovePublication {
                registration_id, ..
            }
            | Self::RemoveSubscription {
                registration_id, ..
            }
            | Self::RemoveCounter {
                registration_id, ..
            } => {
                w.put_i64(*registration_id);
            }
            Self::ClientKeepalive { .. } | Self::ClientClose { .. } => {}
        }

        w.finish()
    }

    /// Parse a command record. Returns `None` for unknown or malformed input.
    #[must_use]
    pub fn decode(type_id: i32, payload: &[u8]) -> Option<Self> {
        let mut r = RecordReader::new(payload);
        let client_id = r.get_i64()?;
        let correlation_id = r.get_i64()?;

        let command = match type_id {
            ADD_PUBLICATION | ADD_EXCLUSIVE_PUBLICATION => {
                let stream_id = r.get_i32()?;
                let channel = r.get_string()?;
                if type_id == ADD_PUBLICATION {
                    Self::AddPublication {
                        client_id,
                        correlation_id,
                        stream_id,
                        channel,
                    }
                } else {
                    Self::AddExclusivePublication {
                        client_id,
                        correlation_id,
                        stream_id,
                        channel,
                    }
                }
            }
            ADD_SUBSCRIPTION => {
                let _registration_correlation_id = r.get_i64()?;
                Self::AddSubscription {
                    client_id,
                    correlation_id,
                    stream_id: r.get_i32()?,
                    channel: r.get_string()?,
                }
            }
            ADD_COUNTER => {
                let type_id = r.get_i32()?;
                let key = r.get_bytes()?.to_vec();
                r.align(4)?;
                Self::AddCounter {
                    client_id,
                    correlation_id,
                    type_id,
                    key,
                    label: r.get_string()?,
                }
            }
            REMOVE_PUBLICATION => Self::RemovePublication {
                client_id,
                correlation_id,
                registration_id: r.get_i64()?,
            },
            REMOVE_SUBSCRIPTION => Self::RemoveSubscription {
                client_id,
                correlation_id,
                registration_id: r.get_i64()?,
            },
            REMOVE_COUNTER => Self::RemoveCounter {
                client_id,
                correlation_id,
                registration_id: r.get_i64()?,
            },
            CLIENT_KEEPALIVE => Self::ClientKeepalive { client_id },
            CLIENT_CLOSE => Self::ClientClose { client_id },
            _ => return None,
        };

        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publication_layout() {
        let cmd = Command::AddPublication {
            client_id: 1,
            correlation_id: 2,
            stream_id: 1001,
            channel: "aeron:ipc".to_string(),
        };
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), 8 + 8 + 4 + 4 + 9);
        assert_eq!(&bytes[16..20], &1001i32.to_le_bytes());
        assert_eq!(&bytes[20..24], &9i32.to_le_bytes());
        assert_eq!(Command::decode(cmd.type_id(), &bytes), Some(cmd));
    }

    #[test]
    fn test_subscription_carries_unset_registration() {
        let cmd = Command::AddSubscription {
            client_id: 1,
            correlation_id: 5,
            stream_id: 7,
            channel: "aeron:udp?endpoint=localhost:24325".to_string(),
        };
        let bytes = cmd.encode();
        assert_eq!(&bytes[16..24], &(-1i64).to_le_bytes());
        assert_eq!(Command::decode(ADD_SUBSCRIPTION, &bytes), Some(cmd));
    }

    #[test]
    fn test_counter_key_is_padded() {
        let cmd = Command::AddCounter {
            client_id: 1,
            correlation_id: 9,
            type_id: 1001,
            key: vec![0xAA; 5],
            label: "my counter".to_string(),
        };
        let bytes = cmd.encode();
        // header 16, type 4, key len 4 + 5 bytes padded to 8, label 4 + 10
        assert_eq!(bytes.len(), 16 + 4 + 4 + 8 + 4 + 10);
        assert_eq!(Command::decode(ADD_COUNTER, &bytes), Some(cmd));
    }

    #[test]
    fn test_unknown_or_truncated() {
        let bytes = Command::ClientClose { client_id: 3 }.encode();
        assert!(Command::decode(0x7F, &bytes).is_none());
        assert!(Command::decode(REMOVE_PUBLICATION, &bytes).is_none());
        assert_eq!(
            Command::decode(CLIENT_CLOSE, &bytes),
            Some(Command::ClientClose { client_id: 3 })
        );
    }
}
