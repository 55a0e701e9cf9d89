use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::{exclusion_key, ExclusionSet, ScopedExclusions};

/// Chapters that do not count toward a learner's progress, after merging
/// every applicable scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectiveExclusionSet {
    keys: BTreeSet<String>,
}

impl EffectiveExclusionSet {
    pub fn is_excluded(&self, subject: &str, chapter: &str) -> bool {
        self.keys.contains(&exclusion_key(subject, chapter))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

/// Union of the `true` keys of every set. Order and repetition of the inputs
/// do not matter.
pub fn union<'a>(sets: impl IntoIterator<Item = &'a ExclusionSet>) -> EffectiveExclusionSet {
    EffectiveExclusionSet {
        keys: sets
            .into_iter()
            .flat_map(|set| set.excluded_keys().map(str::to_string))
            .collect(),
    }
}

/// Merges institution, class and personal exclusions for one learner.
///
/// A chapter is excluded if any scope excludes it. Lower scopes cannot
/// re-include a chapter excluded higher up.
pub fn resolve(
    institution: &ExclusionSet,
    classes: &[ExclusionSet],
    personal: &ExclusionSet,
) -> EffectiveExclusionSet {
    union(
        std::iter::once(institution)
            .chain(classes.iter())
            .chain(std::iter::once(personal)),
    )
}

pub fn resolve_scoped(scoped: &ScopedExclusions) -> EffectiveExclusionSet {
    resolve(&scoped.institution, &scoped.classes, &scoped.personal)
}
