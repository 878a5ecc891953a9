//! Session synchronizer behaviour.

use classroom_common::RoomId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassroomSection {
    /// Prefix of every room id (`{namespace}_{classId}`). Must not contain `_`.
    pub room_namespace: String,
    /// A star award whose new total is a multiple of this is a milestone.
    pub milestone_interval: u32,
    /// Consecutive failed reconnect attempts before the UI is told the
    /// connection is lost.
    pub reconnect_failure_threshold: u32,
    /// Drop incoming messages whose sender role may not publish them.
    pub enforce_roles: bool,
    /// How long a pending resync request waits for a snapshot before it is
    /// re-sent, in milliseconds.
    pub resync_timeout_ms: u64,
}

impl Default for ClassroomSection {
    fn default() -> Self {
        Self {
            room_namespace: "classroom".into(),
            milestone_interval: 5,
            reconnect_failure_threshold: 3,
            enforce_roles: true,
            resync_timeout_ms: 3000,
        }
    }
}

impl ClassroomSection {
    /// Room address of `class_id` under the configured namespace.
    pub fn room_id(&self, class_id: &str) -> RoomId {
        RoomId::new(&self.room_namespace, class_id)
    }
}
