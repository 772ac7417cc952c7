// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver→client response records.
//!
//! The conductor dispatches on [`Response`] with a single `match`; the
//! `encode` side exists for in-process drivers and test harnesses.

use super::{RecordReader, RecordWriter};
use super::{
    ON_AVAILABLE_IMAGE, ON_CLIENT_TIMEOUT, ON_COUNTER_READY, ON_ERROR,
    ON_EXCLUSIVE_PUBLICATION_READY, ON_OPERATION_SUCCESS, ON_PUBLICATION_READY,
    ON_SUBSCRIPTION_READY, ON_UNAVAILABLE_COUNTER, ON_UNAVAILABLE_IMAGE,
};
use crate::error::ErrorCode;

/// Payload of publication and exclusive publication readiness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicationReady {
    pub correlation_id: i64,
    /// Registration shared by every add of the same channel and stream.
    pub registration_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub position_limit_counter_id: i32,
    pub channel_status_indicator_id: i32,
    pub log_file: String,
}

/// An image (remote publisher) became available to a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReady {
    pub correlation_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub subscription_registration_id: i64,
    pub subscriber_position_id: i32,
    pub log_file: String,
    pub source_identity: String,
}

/// Decoded broadcast record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    PublicationReady(PublicationReady),
    ExclusivePublicationReady(PublicationReady),
    SubscriptionReady {
        correlation_id: i64,
        channel_status_indicator_id: i32,
    },
    CounterReady {
        correlation_id: i64,
        counter_id: i32,
    },
    OperationSuccess {
        correlation_id: i64,
    },
    Error {
        offending_correlation_id: i64,
        code: ErrorCode,
        message: String,
    },
    AvailableImage(ImageReady),
    UnavailableImage {
        correlation_id: i64,
        subscription_registration_id: i64,
        stream_id: i32,
        channel: String,
    },
    UnavailableCounter {
        registration_id: i64,
        counter_id: i32,
    },
    ClientTimeout {
        client_id: i64,
    },
}

impl Response {
    /// Broadcast message type id.
    #[must_use]
    pub fn type_id(&self) -> i32 {
        match self {
            Self::PublicationReady(_) => ON_PUBLICATION_READY,
            Self::ExclusivePublicationReady(_) => ON_EXCLUSIVE_PUBLICATION_READY,
            Self::SubscriptionReady { .. } => ON_SUBSCRIPTION_READY,
            Self::CounterReady { .. } => ON_COUNTER_READY,
            Self::OperationSuccess { .. } => ON_OPERATION_SUCCESS,
            Self::Error { .. } => ON_ERROR,
            Self::AvailableImage(_) => ON_AVAILABLE_IMAGE,
            Self::UnavailableImage { .. } => ON_UNAVAILABLE_IMAGE,
            Self::UnavailableCounter { .. } => ON_UNAVAILABLE_COUNTER,
            Self::ClientTimeout { .. } => ON_CLIENT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = RecordWriter::with_capacity(64);
        match self {
            Self::PublicationReady(ready) | Self::ExclusivePublicationReady(ready) => {
                w.put_i64(ready.correlation_id)
                    .put_i64(ready.registration_id)
                    .put_i32(ready.session_id)
                    .put_i32(ready.stream_id)
                    .put_i32(ready.position_limit_counter_id)
                    .put_i32(ready.channel_status_indicator_id)
                    .put_str(&ready.log_file);
            }
            Self::SubscriptionReady {
                correlation_id,
                channel_status_indicator_id,
            } => {
                w.put_i64(*correlation_id)
                    .put_i32(*channel_status_indicator_id);
            }
            Self::CounterReady {
                correlation_id,
                counter_id,
            } => {
                w.put_i64(*correlation_id).put_i32(*counter_id);
            }
            Self::OperationSuccess { correlation_id } => {
                w.put_i64(*correlation_id);
            }
            Self::Error {
                offending_correlation_id,
                code,
                message,
            } => {
                w.put_i64(*offending_correlation_id)
                    .put_i32(code.as_i32())
                    .put_str(message);
            }
            Self::AvailableImage(image) => {
                w.put_i64(image.correlation_id)
                    .put_i32(image.session_id)
                    .put_i32(image.stream_id)
                    .put_i64(image.subscription_registration_id)
                    .put_i32(image.subscriber_position_id)
                    .put_str(&image.log_file)
                    .put_str(&image.source_identity);
            }
            Self::UnavailableImage {
                correlation_id,
                subscription_registration_id,
                stream_id,
                channel,
            } => {
                w.put_i64(*correlation_id)
                    .put_i64(*subscription_registration_id)
                    .put_i32(*stream_id)
                    .put_str(channel);
            }
            Self::UnavailableCounter {
                registration_id,
                counter_id,
            } => {
                w.put_i64(*registration_id).put_i32(*counter_id);
            }
            Self::ClientTimeout { client_id } => {
                w.put_i64(*client_id);
            }
        }
        w.finish()
    }

    /// Parse a broadcast record. Returns `None` for unknown or malformed input.
    #[must_use]
    pub fn decode(type_id: i32, payload: &[u8]) -> Option<Self> {
        let mut r = RecordReader::new(payload);

        let response = match type_id {
            ON_PUBLICATION_READY | ON_EXCLUSIVE_PUBLICATION_READY => {
                let ready = PublicationReady {
                    correlation_id: r.get_i64()?,
                    registration_id: r.get_i64()?,
                    session_id: r.get_i32()?,
                    stream_id: r.get_i32()?,
                    position_limit_counter_id: r.get_i32()?,
                    channel_status_indicator_id: r.get_i32()?,
                    log_file: r.get_string()?,
                };
                if type_id == ON_PUBLICATION_READY {
                    Self::PublicationReady(ready)
                } else {
                    Self::ExclusivePublicationReady(ready)
                }
            }
            ON_SUBSCRIPTION_READY => Self::SubscriptionReady {
                correlation_id: r.get_i64()?,
                channel_status_indicator_id: r.get_i32()?,
            },
            ON_COUNTER_READY => Self::CounterReady {
                correlation_id: r.get_i64()?,
                counter_id: r.get_i32()?,
            },
            ON_OPERATION_SUCCESS => Self::OperationSuccess {
                correlation_id: r.get_i64()?,
            },
            ON_ERROR => Self::Error {
                offending_correlation_id: r.get_i64()?,
                code: ErrorCode::from_i32(r.get_i32()?),
                message: r.get_string()?,
            },
            ON_AVAILABLE_IMAGE => Self::AvailableImage(ImageReady {
                correlation_id: r.get_i64()?,
                session_id: r.get_i32()?,
                stream_id: r.get_i32()?,
                subscription_registration_id: r.get_i64()?,
                subscriber_position_id: r.get_i32()?,
                log_file: r.get_string()?,
                source_identity: r.get_string()?,
            }),
            ON_UNAVAILABLE_IMAGE => Self::UnavailableImage {
                correlation_id: r.get_i64()?,
                subscription_registration_id: r.get_i64()?,
                stream_id: r.get_i32()?,
                channel: r.get_string()?,
            },
            ON_UNAVAILABLE_COUNTER => Self::UnavailableCounter {
                registration_id: r.get_i64()?,
                counter_id: r.get_i32()?,
            },
            ON_CLIENT_TIMEOUT => Self::ClientTimeout {
                client_id: r.get_i64()?,
            },
            _ => return None,
        };

        Some(response)
    }
}
