use serde::{Deserialize, Serialize};

use codegrade_core::CourseId;

/// Cache key used for the global (site-wide) permission map.
pub const GLOBAL_CACHE_KEY: &str = "GLOBAL_PERMS";

/// Addressing unit for a permission query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Site-wide permissions.
    #[default]
    Global,
    /// Permissions within a single course.
    Course(CourseId),
}

impl PermissionScope {
    pub fn course_id(&self) -> Option<CourseId> {
        match self {
            PermissionScope::Global => None,
            PermissionScope::Course(id) => Some(*id),
        }
    }

    /// Key under which this scope's map is persisted and coalesced.
    pub fn cache_key(&self) -> String {
        match self {
            PermissionScope::Global => GLOBAL_CACHE_KEY.to_string(),
            PermissionScope::Course(id) => id.to_string(),
        }
    }
}

impl From<CourseId> for PermissionScope {
    fn from(value: CourseId) -> Self {
        PermissionScope::Course(value)
    }
}

impl From<Option<CourseId>> for PermissionScope {
    fn from(value: Option<CourseId>) -> Self {
        value.map_or(PermissionScope::Global, PermissionScope::Course)
    }
}

impl core::fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PermissionScope::Global => f.write_str("global"),
            PermissionScope::Course(id) => write!(f, "course {id}"),
        }
    }
}
