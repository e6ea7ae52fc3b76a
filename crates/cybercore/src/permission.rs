//! Role based permission gate.
//!
//! Pure functions only: a role maps to a fixed set of allowed operations.

use crate::FlowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The caller's resolved role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Viewer,
}

/// Operations that go through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    View,
    CreateNode,
    UpdateNode,
    DeleteNode,
    CreateEdge,
    DeleteEdge,
    Import,
    Execute,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Editor, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::View => "view the workflow",
            Operation::CreateNode => "create nodes",
            Operation::UpdateNode => "update nodes",
            Operation::DeleteNode => "delete nodes",
            Operation::CreateEdge => "create edges",
            Operation::DeleteEdge => "delete edges",
            Operation::Import => "import workflows",
            Operation::Execute => "execute workflows",
        };
        f.write_str(name)
    }
}

/// Whether `role` may perform `operation`.
///
/// Removing a connection is ordinary editing, so `DeleteEdge` follows the
/// editor rules; only whole nodes need an admin to delete.
pub fn is_allowed(role: Role, operation: Operation) -> bool {
    match operation {
        Operation::View => true,
        Operation::CreateNode
        | Operation::UpdateNode
        | Operation::CreateEdge
        | Operation::DeleteEdge
        | Operation::Import
        | Operation::Execute => matches!(role, Role::Admin | Role::Editor),
        Operation::DeleteNode => matches!(role, Role::Admin),
    }
}

/// Gate check returning `PermissionDenied` on refusal.
pub fn require(role: Role, operation: Operation) -> Result<(), FlowError> {
    if is_allowed(role, operation) {
        Ok(())
    } else {
        tracing::warn!(role = %role, ?operation, "Permission denied");
        Err(FlowError::PermissionDenied { role, operation })
    }
}

/// Every operation `role` may perform.
pub fn allowed_operations(role: Role) -> Vec<Operation> {
    [
        Operation::View,
        Operation::CreateNode,
        Operation::UpdateNode,
        Operation::DeleteNode,
        Operation::CreateEdge,
        Operation::DeleteEdge,
        Operation::Import,
        Operation::Execute,
    ]
    .into_iter()
    .filter(|op| is_allowed(role, *op))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_is_read_only() {
        assert_eq!(allowed_operations(Role::Viewer), vec![Operation::View]);
        assert!(require(Role::Viewer, Operation::Execute).is_err());
    }

    #[test]
    fn editor_cannot_delete_nodes() {
        assert!(is_allowed(Role::Editor, Operation::CreateNode));
        assert!(is_allowed(Role::Editor, Operation::UpdateNode));
        assert!(is_allowed(Role::Editor, Operation::Execute));
        assert!(!is_allowed(Role::Editor, Operation::DeleteNode));
    }

    #[test]
    fn admin_can_do_everything() {
        assert_eq!(allowed_operations(Role::Admin).len(), 8);
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert!("owner".parse::<Role>().is_err());
    }
}
