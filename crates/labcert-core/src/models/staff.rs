//! Lab staff directory models.

use serde::{Deserialize, Serialize};

use crate::access::Role;

/// A member of the lab staff. Credentials live with the external
/// authentication service, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaffMember {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub active: bool,
    pub roles: Vec<Role>,
}

impl StaffMember {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Input for adding a staff member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewStaffMember {
    pub name: String,
    pub email: String,
    pub roles: Vec<Role>,
}

impl NewStaffMember {
    /// Check the fields an account needs before it is stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("staff name is required".into());
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(format!("'{email}' is not a valid email address")),
        }
    }
}
