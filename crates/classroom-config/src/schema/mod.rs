//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod classroom;
mod realtime;
mod relay;
mod system;

pub use classroom::*;
pub use realtime::*;
pub use relay::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassroomConfig {
    pub realtime: RealtimeSection,
    pub classroom: ClassroomSection,
    pub relay: RelaySection,
    pub logging: LoggingConfig,
}
