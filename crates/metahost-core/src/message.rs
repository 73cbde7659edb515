//! Messages exchanged between the manager and workers.
//!
//! Commands travel on a per-type channel named after the instance type,
//! reports travel on the shared [`INFO_CHANNEL`]. Every payload is a JSON
//! object carrying a `subject` tag; [`Message::decode`] validates it once at
//! the channel boundary so handlers only ever see typed variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{Instance, InstanceType, Result};

pub const INFO_CHANNEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    CreateInstance,
    DeleteInstance,
    InstanceType,
    InstanceInfo,
}

impl Subject {
    pub fn as_str(self) -> &'static str {
        match self {
            Subject::CreateInstance => "create_instance",
            Subject::DeleteInstance => "delete_instance",
            Subject::InstanceType => "instance_type",
            Subject::InstanceInfo => "instance_info",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create_instance" => Some(Subject::CreateInstance),
            "delete_instance" => Some(Subject::DeleteInstance),
            "instance_type" => Some(Subject::InstanceType),
            "instance_info" => Some(Subject::InstanceInfo),
            _ => None,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "snake_case")]
pub enum Message {
    CreateInstance {
        instance: Instance,
    },
    DeleteInstance {
        instance: Instance,
    },
    InstanceType {
        #[serde(rename = "type")]
        instance_type: InstanceType,
    },
    InstanceInfo {
        instance: Instance,
    },
}

/// Why a payload was rejected at the channel boundary. None of these are
/// retried: the message is logged and dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MessageError {
    #[error("payload is not a JSON object: {0}")]
    Malformed(String),
    #[error("payload carries no subject")]
    MissingSubject,
    #[error("unknown message subject: {0}")]
    UnknownSubject(String),
    #[error("invalid '{subject}' payload: {reason}")]
    InvalidPayload { subject: Subject, reason: String },
}

impl Message {
    pub fn subject(&self) -> Subject {
        match self {
            Message::CreateInstance { .. } => Subject::CreateInstance,
            Message::DeleteInstance { .. } => Subject::DeleteInstance,
            Message::InstanceType { .. } => Subject::InstanceType,
            Message::InstanceInfo { .. } => Subject::InstanceInfo,
        }
    }

    pub fn create_instance(instance: Instance) -> Self {
        Message::CreateInstance { instance }
    }

    pub fn delete_instance(instance: Instance) -> Self {
        Message::DeleteInstance { instance }
    }

    pub fn instance_info(instance: Instance) -> Self {
        Message::InstanceInfo { instance }
    }

    pub fn instance_type(instance_type: InstanceType) -> Self {
        Message::InstanceType { instance_type }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> std::result::Result<Self, MessageError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| MessageError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(MessageError::Malformed("expected an object".to_string()));
        }

        let raw_subject = get_message_subject(&value).ok_or(MessageError::MissingSubject)?;
        let subject = Subject::parse(raw_subject)
            .ok_or_else(|| MessageError::UnknownSubject(raw_subject.to_string()))?;

        serde_json::from_value(value).map_err(|e| MessageError::InvalidPayload {
            subject,
            reason: e.to_string(),
        })
    }
}

/// The raw `subject` string of a payload, if it has one.
pub fn get_message_subject(value: &Value) -> Option<&str> {
    value.get("subject").and_then(Value::as_str)
}
