pub mod errors;
pub mod id;

pub use errors::{ClassroomError, ConfigError};
pub use id::{new_id, new_short_id, RoomId, RoomIdError};

pub type Result<T> = std::result::Result<T, ClassroomError>;
