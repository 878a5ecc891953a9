//! Sender stamping and role checks applied to every inbound envelope.
//!
//! The envelope is handled as raw JSON so message kinds this build does not
//! know pass through byte-for-byte apart from `sender`.

use classroom_sync::{capability, CapabilityError, ClassroomMessage, Envelope, Participant};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope must be a JSON object")]
    NotAnObject,

    #[error(transparent)]
    Forbidden(#[from] CapabilityError),
}

/// An envelope ready for fan-out.
#[derive(Debug)]
pub struct Stamped {
    pub envelope: Value,
    /// A teacher's `session_end`: the room closes after fan-out.
    pub ends_session: bool,
}

/// Overwrite the sender with the identity bound at join and check the
/// capability table.
pub fn stamp_and_authorize(
    bound: &Participant,
    text: &str,
    enforce_roles: bool,
) -> Result<Stamped, GateError> {
    let mut value: Value = serde_json::from_str(text)?;
    let object = value.as_object_mut().ok_or(GateError::NotAnObject)?;
    object.insert("sender".into(), serde_json::to_value(bound)?);

    let envelope: Envelope = serde_json::from_value(value.clone())?;
    if enforce_roles {
        capability::authorize(bound, &envelope.message)?;
    }

    Ok(Stamped {
        ends_session: bound.is_teacher() && envelope.message == ClassroomMessage::SessionEnd,
        envelope: value,
    })
}
