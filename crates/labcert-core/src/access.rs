//! Role-based access control.
//!
//! Every public operation on [`crate::Lab`] takes the [`Caller`] that issued
//! it and checks the caller's roles before touching storage.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::LabError;

/// Closed set of lab roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Registers requesters and samples
    #[serde(alias = "Registro de Datos", alias = "DataEntry")]
    DataEntry,
    /// Records results and produces reports
    #[serde(alias = "Evaluador", alias = "Evaluator")]
    Evaluator,
    /// Assigns work, manages parameters and certifies reports
    #[serde(alias = "Validacion", alias = "Validación", alias = "Validator")]
    Validator,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::DataEntry, Role::Evaluator, Role::Validator];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::DataEntry => "data_entry",
            Role::Evaluator => "evaluator",
            Role::Validator => "validator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "data_entry" | "DataEntry" | "Registro de Datos" => Some(Role::DataEntry),
            "evaluator" | "Evaluator" | "Evaluador" => Some(Role::Evaluator),
            "validator" | "Validator" | "Validacion" | "Validación" => Some(Role::Validator),
            _ => None,
        }
    }
}

/// Authenticated identity behind a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub name: String,
    pub roles: BTreeSet<Role>,
}

impl Caller {
    pub fn new(user_id: i64, name: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            user_id,
            name: name.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Succeeds when the caller holds at least one of `roles`.
    pub fn require_any(&self, roles: &[Role]) -> Result<(), LabError> {
        if roles.iter().any(|r| self.roles.contains(r)) {
            return Ok(());
        }
        let wanted: Vec<&str> = roles.iter().map(Role::as_str).collect();
        tracing::warn!(
            user_id = self.user_id,
            required = ?wanted,
            "role check failed"
        );
        Err(LabError::Authorization(format!(
            "requires one of the roles: {}",
            wanted.join(", ")
        )))
    }
}
