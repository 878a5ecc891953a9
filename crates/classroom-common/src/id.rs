use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Eight hex characters; enough to tell request ids apart in logs.
pub fn new_short_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomIdError {
    #[error("room id is empty")]
    Empty,

    #[error("room id `{0}` is not of the form namespace_classId")]
    MissingSeparator(String),
}

/// Address of one live lesson: `{namespace}_{classId}`.
///
/// The namespace may not contain `_`; the class id may.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn new(namespace: &str, class_id: &str) -> Self {
        Self(format!("{namespace}_{class_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.0.split_once('_').map(|(ns, _)| ns).unwrap_or(&self.0)
    }

    pub fn class_id(&self) -> &str {
        self.0.split_once('_').map(|(_, id)| id).unwrap_or("")
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(RoomIdError::Empty);
        }
        match s.split_once('_') {
            Some((ns, id)) if !ns.is_empty() && !id.is_empty() => Ok(Self(s.to_string())),
            _ => Err(RoomIdError::MissingSeparator(s.to_string())),
        }
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
