use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role a participant plays in a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn is_teacher(&self) -> bool {
        matches!(self, Self::Teacher)
    }
}

/// Someone connected to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
        }
    }

    /// A participant with a fresh random id.
    pub fn generate(display_name: &str, role: Role) -> Self {
        Self::new(Uuid::new_v4().to_string(), display_name, role)
    }

    pub fn teacher(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(id, display_name, Role::Teacher)
    }

    pub fn student(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(id, display_name, Role::Student)
    }

    pub fn is_teacher(&self) -> bool {
        self.role.is_teacher()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Teacher).unwrap(), "\"teacher\"");
        assert_eq!(serde_json::to_string(&Role::Student).unwrap(), "\"student\"");
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Participant::generate("Ana", Role::Student);
        let b = Participant::generate("Ana", Role::Student);
        assert_ne!(a.id, b.id);
        assert_eq!(a.display_name, "Ana");
        assert!(!a.is_teacher());
    }
}
