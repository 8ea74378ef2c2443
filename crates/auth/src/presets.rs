//! Named permission groups the UI asks about together.

use crate::{Permission, PermissionQuery};

/// Permissions that allow managing an assignment within a course.
pub const MANAGE_ASSIGNMENT_PERMISSIONS: &[&str] = &[
    "can_edit_assignment_info",
    "can_assign_graders",
    "can_edit_cgignore",
    "can_grade_work",
    "can_update_grader_status",
    "can_use_linter",
    "can_update_course_notifications",
    "manage_rubrics",
    "can_upload_bb_zip",
    "can_submit_others_work",
];

/// Permissions that allow managing course membership and roles.
pub const MANAGE_GENERAL_COURSE_PERMISSIONS: &[&str] =
    &["can_edit_course_users", "can_edit_course_roles"];

/// Site-wide management permissions.
pub const MANAGE_SITE_PERMISSIONS: &[&str] = &["can_manage_site_users"];

/// Every course management permission (assignment + general).
pub fn manage_course_permissions() -> Vec<Permission> {
    MANAGE_ASSIGNMENT_PERMISSIONS
        .iter()
        .chain(MANAGE_GENERAL_COURSE_PERMISSIONS)
        .map(|name| Permission::from(*name))
        .collect()
}

/// Map-shaped question over a preset group.
pub fn query_for(group: &[&'static str]) -> PermissionQuery {
    PermissionQuery::as_map(group.iter().copied())
}
