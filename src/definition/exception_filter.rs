//! Include/exclude filter over error kinds.
//!
//! An [`ArtifactError`] carries its own kind plus an ordered list of ancestor
//! kinds (nearest first). A filter entry matches at distance 0 for the kind
//! itself and at distance `n` for the n-th ancestor; the nearest include wins
//! unless an exclude is strictly nearer.

use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExceptionClassFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ExceptionClassFilter {
    pub fn including<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: kinds.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn excluding<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(kinds.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    pub fn matches(&self, error: &ArtifactError) -> bool {
        // nothing included means nothing matches, excludes are irrelevant
        if self.include.is_empty() {
            return false;
        }
        let kind = error.kind();
        if self.include.iter().any(|k| k == kind) {
            return true;
        }
        if self.exclude.iter().any(|k| k == kind) {
            return false;
        }

        let Some(include_distance) = Self::nearest(error, &self.include) else {
            return false;
        };
        if include_distance == 1 || self.exclude.is_empty() {
            return true;
        }
        match Self::nearest(error, &self.exclude) {
            Some(exclude_distance) => include_distance < exclude_distance,
            None => true,
        }
    }

    fn nearest(error: &ArtifactError, kinds: &[String]) -> Option<usize> {
        error
            .ancestors()
            .iter()
            .position(|ancestor| kinds.iter().any(|k| k == ancestor))
            .map(|index| index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(kind: &str, ancestors: &[&str]) -> ArtifactError {
        ArtifactError::new(kind, "boom").with_ancestors(ancestors.iter().copied())
    }

    #[test]
    fn test_empty_include_matches_nothing() {
        let filter = ExceptionClassFilter::default().excluding(["io"]);
        assert!(!filter.matches(&error("io", &[])));
    }

    #[test]
    fn test_exact_include_and_exclude() {
        let filter = ExceptionClassFilter::including(["parse"]).excluding(["io"]);
        assert!(filter.matches(&error("parse", &[])));
        assert!(!filter.matches(&error("io", &["parse"])));
    }

    #[test]
    fn test_nearest_ancestor_wins() {
        let filter = ExceptionClassFilter::including(["runtime"]).excluding(["illegal_state"]);
        // illegal_state is nearer than runtime
        assert!(!filter.matches(&error("bad_cursor", &["illegal_state", "runtime"])));
        // runtime is the direct parent
        assert!(filter.matches(&error("bad_arg", &["runtime", "illegal_state"])));
        // unrelated hierarchy
        assert!(!filter.matches(&error("timeout", &["io"])));
    }

    #[test]
    fn test_include_without_excludes_matches_any_ancestor_distance() {
        let filter = ExceptionClassFilter::including(["base"]);
        assert!(filter.matches(&error("leaf", &["mid", "base"])));
    }
}
