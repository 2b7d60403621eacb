//! Visibility scope resolution and the small policy helpers around it.

use dcare_core::{Department, FeedError, Profile, Role, Scope};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::gate::Requirement;

/// A feed surface a caller navigates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Surface {
    /// Public report feed across all departments.
    PublicFeed,
    /// Department dashboard, optionally bound to one department by its route.
    Dashboard { fixed: Option<Department> },
}

impl Surface {
    /// Gate requirement for the surface; `None` means open to everyone.
    pub fn requirement(&self) -> Option<Requirement> {
        match self {
            Surface::PublicFeed => None,
            Surface::Dashboard { fixed } => Some(Requirement::Dept { department: *fixed }),
        }
    }

    pub fn resolve(&self, profile: Option<&Profile>, route_dept: Option<Department>) -> Result<Scope, FeedError> {
        match self {
            Surface::PublicFeed => Ok(Scope::All),
            Surface::Dashboard { fixed } => resolve(profile, route_dept, *fixed),
        }
    }
}

/// Department for a dashboard: fixed route > route parameter > profile.
pub fn resolve(profile: Option<&Profile>, route_dept: Option<Department>, fixed_dept: Option<Department>) -> Result<Scope, FeedError> {
    if let Some(d) = fixed_dept {
        return Ok(Scope::Fixed(d));
    }
    if let Some(d) = route_dept.or_else(|| profile.and_then(|p| p.department)) {
        return Ok(Scope::Parametric(d));
    }
    Err(FeedError::NoScope)
}

/// Parse a route parameter; unknown names count as absent.
pub fn parse_route_dept(raw: Option<&str>) -> Option<Department> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(error = %e, "scope: ignoring route department");
            None
        }
    }
}

/// Where `/dashboard` sends a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Landing {
    Dashboard(Department),
    Home,
}

pub fn dashboard_landing(profile: Option<&Profile>) -> Landing {
    match profile {
        Some(Profile { role: Role::Dept, department: Some(d), .. }) => Landing::Dashboard(*d),
        Some(Profile { role: Role::Admin, .. }) => Landing::Dashboard(Department::ALL[0]),
        _ => Landing::Home,
    }
}

/// Whether `profile` may change status and notes of records in `scope`.
pub fn can_edit(profile: Option<&Profile>, scope: &Scope) -> bool {
    match profile {
        Some(Profile { role: Role::Admin, .. }) => true,
        Some(Profile { role: Role::Dept, department: Some(d), .. }) => scope.department() == Some(*d),
        _ => false,
    }
}
