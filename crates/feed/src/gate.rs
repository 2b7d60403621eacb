//! Route guard: decides whether a session may open a surface.

use dcare_core::{Department, FeedError, Principal, Profile, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requirement {
    /// Any signed-in principal.
    SignedIn,
    /// Department staff or admin; when `department` is set, staff must belong to it.
    Dept { department: Option<Department> },
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    Unauthenticated,
    Unauthorized(String),
}

/// Where a denied caller is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Redirect {
    Login,
    Home,
}

impl DenyReason {
    pub fn redirect(&self) -> Redirect {
        match self {
            DenyReason::Unauthenticated => Redirect::Login,
            DenyReason::Unauthorized(_) => Redirect::Home,
        }
    }
}

impl From<DenyReason> for FeedError {
    fn from(r: DenyReason) -> Self {
        match r {
            DenyReason::Unauthenticated => FeedError::Unauthenticated,
            DenyReason::Unauthorized(why) => FeedError::Unauthorized(why),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
    /// Session or profile still loading; render nothing conclusive.
    Pending,
}

/// Pure authorization check.
pub fn authorize(principal: Option<&Principal>, profile: Option<&Profile>, requirement: &Requirement) -> Result<(), DenyReason> {
    if principal.is_none() {
        return Err(DenyReason::Unauthenticated);
    }
    let role = profile.map(|p| p.role);
    match requirement {
        Requirement::SignedIn => Ok(()),
        Requirement::Admin => match role {
            Some(Role::Admin) => Ok(()),
            _ => Err(DenyReason::Unauthorized("admin role required".into())),
        },
        Requirement::Dept { department } => match (role, department) {
            (Some(Role::Admin), _) => Ok(()),
            (Some(Role::Dept), None) => Ok(()),
            (Some(Role::Dept), Some(want)) => {
                let have = profile.and_then(|p| p.department);
                if have == Some(*want) {
                    Ok(())
                } else {
                    Err(DenyReason::Unauthorized(format!("{} department required", want)))
                }
            }
            _ => Err(DenyReason::Unauthorized("department role required".into())),
        },
    }
}
