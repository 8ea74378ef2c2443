//! Permission questions and their answers.
//!
//! A question is asked in one of three shapes and always answered in the
//! same shape: a single name yields a `bool`, a list yields a `Vec<bool>` in
//! input order, and a list asked "as map" yields `name -> bool`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Permission, PermissionMap};

/// The shape of a permission question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "names", rename_all = "snake_case")]
pub enum PermissionQuery {
    Single(Permission),
    List(Vec<Permission>),
    ListAsMap(Vec<Permission>),
}

/// The answer to a [`PermissionQuery`], mirroring its shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionAnswer {
    Bool(bool),
    List(Vec<bool>),
    Map(BTreeMap<String, bool>),
}

impl PermissionQuery {
    pub fn single(name: impl Into<Permission>) -> Self {
        PermissionQuery::Single(name.into())
    }

    pub fn list<I, P>(names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        PermissionQuery::List(names.into_iter().map(Into::into).collect())
    }

    pub fn as_map<I, P>(names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        PermissionQuery::ListAsMap(names.into_iter().map(Into::into).collect())
    }

    /// Every name this question asks about, in input order.
    pub fn names(&self) -> &[Permission] {
        match self {
            PermissionQuery::Single(p) => std::slice::from_ref(p),
            PermissionQuery::List(ps) | PermissionQuery::ListAsMap(ps) => ps,
        }
    }

    /// Build an answer by looking up each name; `None` if any lookup fails.
    pub fn try_resolve<F>(&self, mut lookup: F) -> Option<PermissionAnswer>
    where
        F: FnMut(&str) -> Option<bool>,
    {
        Some(match self {
            PermissionQuery::Single(p) => PermissionAnswer::Bool(lookup(p.as_str())?),
            PermissionQuery::List(ps) => PermissionAnswer::List(
                ps.iter()
                    .map(|p| lookup(p.as_str()))
                    .collect::<Option<Vec<_>>>()?,
            ),
            PermissionQuery::ListAsMap(ps) => PermissionAnswer::Map(
                ps.iter()
                    .map(|p| lookup(p.as_str()).map(|v| (p.as_str().to_string(), v)))
                    .collect::<Option<BTreeMap<_, _>>>()?,
            ),
        })
    }

    /// Answer from a cached map, only if every requested name is present.
    pub fn answer_from_cache(&self, map: &PermissionMap) -> Option<PermissionAnswer> {
        self.try_resolve(|name| map.get(name))
    }

    /// Answer from a freshly fetched map; names the server omitted are `false`.
    pub fn answer_from(&self, map: &PermissionMap) -> PermissionAnswer {
        self.resolve_total(|name| map.get(name).unwrap_or(false))
    }

    /// The answer with every value forced to `false`.
    pub fn denied(&self) -> PermissionAnswer {
        self.resolve_total(|_| false)
    }

    fn resolve_total<F>(&self, mut lookup: F) -> PermissionAnswer
    where
        F: FnMut(&str) -> bool,
    {
        match self.try_resolve(|name| Some(lookup(name))) {
            Some(answer) => answer,
            // try_resolve only yields None when the lookup does.
            None => PermissionAnswer::Bool(false),
        }
    }
}

impl From<Permission> for PermissionQuery {
    fn from(value: Permission) -> Self {
        PermissionQuery::Single(value)
    }
}

impl From<&'static str> for PermissionQuery {
    fn from(value: &'static str) -> Self {
        PermissionQuery::Single(value.into())
    }
}

impl PermissionAnswer {
    /// The single boolean, if this answers a single-name question.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PermissionAnswer::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// `true` if at least one requested permission is granted.
    pub fn any(&self) -> bool {
        match self {
            PermissionAnswer::Bool(b) => *b,
            PermissionAnswer::List(vs) => vs.iter().any(|v| *v),
            PermissionAnswer::Map(m) => m.values().any(|v| *v),
        }
    }

    /// `true` if every requested permission is granted.
    pub fn all(&self) -> bool {
        match self {
            PermissionAnswer::Bool(b) => *b,
            PermissionAnswer::List(vs) => vs.iter().all(|v| *v),
            PermissionAnswer::Map(m) => m.values().all(|v| *v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> PermissionMap {
        [("a", true), ("b", false), ("c", true)].into_iter().collect()
    }

    #[test]
    fn answers_match_question_shape() {
        let map = map();

        assert_eq!(
            PermissionQuery::single("a").answer_from(&map),
            PermissionAnswer::Bool(true)
        );
        assert_eq!(
            PermissionQuery::list(["b", "a"]).answer_from(&map),
            PermissionAnswer::List(vec![false, true])
        );

        let PermissionAnswer::Map(m) = PermissionQuery::as_map(["a", "b"]).answer_from(&map) else {
            panic!("expected map answer");
        };
        assert_eq!(m.len(), 2);
        assert_eq!(m["a"], true);
        assert_eq!(m["b"], false);
    }

    #[test]
    fn cached_answer_requires_every_name() {
        let map = map();
        assert!(PermissionQuery::list(["a", "c"]).answer_from_cache(&map).is_some());
        assert!(PermissionQuery::list(["a", "missing"]).answer_from_cache(&map).is_none());
        assert!(PermissionQuery::single("missing").answer_from_cache(&map).is_none());
    }

    #[test]
    fn fresh_answer_defaults_missing_names_to_false() {
        assert_eq!(
            PermissionQuery::list(["missing", "a"]).answer_from(&map()),
            PermissionAnswer::List(vec![false, true])
        );
    }

    #[test]
    fn denied_keeps_shape() {
        assert_eq!(PermissionQuery::single("x").denied(), PermissionAnswer::Bool(false));
        assert_eq!(
            PermissionQuery::list(["x", "y"]).denied(),
            PermissionAnswer::List(vec![false, false])
        );
        let PermissionAnswer::Map(m) = PermissionQuery::as_map(["x", "y"]).denied() else {
            panic!("expected map answer");
        };
        assert!(m.values().all(|v| !v));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn any_and_all() {
        let answer = PermissionAnswer::List(vec![false, true]);
        assert!(answer.any());
        assert!(!answer.all());
        assert_eq!(answer.as_bool(), None);
    }
}
