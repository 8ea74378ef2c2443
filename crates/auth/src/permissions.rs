use std::borrow::{Borrow, Cow};
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings as the server names them
/// (e.g. `"can_grade_work"`). The client never interprets them beyond
/// equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl Borrow<str> for Permission {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

/// The full permission map the server returns for one scope.
///
/// Serialized as a plain JSON object `{ "name": bool, ... }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMap(BTreeMap<String, bool>);

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `name`, or `None` when the server did not mention it.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, granted: bool) {
        self.0.insert(name.into(), granted);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Names that are granted, in sorted order.
    pub fn granted(&self) -> impl Iterator<Item = &str> {
        self.iter().filter(|(_, v)| *v).map(|(k, _)| k)
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for PermissionMap {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<BTreeMap<String, bool>> for PermissionMap {
    fn from(value: BTreeMap<String, bool>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_deserializes_from_plain_object() {
        let map: PermissionMap =
            serde_json::from_str(r#"{"can_grade_work": true, "can_edit_course_users": false}"#)
                .unwrap();

        assert_eq!(map.get("can_grade_work"), Some(true));
        assert_eq!(map.get("can_edit_course_users"), Some(false));
        assert_eq!(map.get("can_submit_own_work"), None);
        assert_eq!(map.granted().collect::<Vec<_>>(), vec!["can_grade_work"]);
    }

    #[test]
    fn permission_serializes_as_string() {
        let perm = Permission::from("manage_rubrics");
        assert_eq!(serde_json::to_string(&perm).unwrap(), r#""manage_rubrics""#);
        assert_eq!(perm.to_string(), "manage_rubrics");
    }
}
