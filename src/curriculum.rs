//! Curriculum lookup.
//!
//! The engine treats curricula as an injected, read-only source. Lookups
//! never fail: an unknown key yields an empty tree so progress degrades to
//! zero instead of erroring.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{CurriculumKey, CurriculumTree, Program};

pub trait CurriculumIndex: Send + Sync {
    /// Returns the tree for `key`, restricted to `subject_filter` when given.
    ///
    /// A filter that matches none of the tree's subjects is ignored and the
    /// whole tree is returned. Callers that need strict filtering must check
    /// membership themselves.
    fn lookup(&self, key: &CurriculumKey, subject_filter: Option<&[String]>) -> CurriculumTree;

    fn available_subjects(&self, key: &CurriculumKey) -> Vec<String> {
        self.lookup(key, None).subject_names()
    }
}

/// Restricts `tree` to the requested subjects, falling back to the full tree
/// when none of them are present.
pub fn apply_subject_filter(
    tree: CurriculumTree,
    subject_filter: Option<&[String]>,
) -> CurriculumTree {
    let Some(requested) = subject_filter else {
        return tree;
    };

    let filtered: CurriculumTree = CurriculumTree {
        subjects: tree
            .subjects
            .iter()
            .filter(|(name, _)| requested.iter().any(|r| r == *name))
            .map(|(name, subject)| (name.clone(), subject.clone()))
            .collect(),
    };

    if filtered.is_empty() {
        debug!(?requested, "subject filter matched nothing; using full curriculum");
        tree
    } else {
        filtered
    }
}

/// Table key after program aliasing. Post-tenth streams read the
/// high-school tables and exam curricula have no level.
fn storage_key(key: &CurriculumKey) -> CurriculumKey {
    match key.program {
        Program::AfterTenth => CurriculumKey {
            program: Program::HighSchool,
            ..key.clone()
        },
        Program::Exam => CurriculumKey {
            level: None,
            ..key.clone()
        },
        Program::HighSchool => key.clone(),
    }
}

/// Curriculum tables held in memory, optionally with a default board used
/// when a school board has no tables of its own.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCurriculumIndex {
    trees: HashMap<CurriculumKey, CurriculumTree>,
    default_board: Option<String>,
}

impl InMemoryCurriculumIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_default_board(mut self, board: impl Into<String>) -> Self {
        self.default_board = Some(board.into());
        self
    }

    pub fn insert(&mut self, key: CurriculumKey, tree: CurriculumTree) {
        self.trees.insert(storage_key(&key), tree);
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    fn resolve(&self, key: &CurriculumKey) -> Option<&CurriculumTree> {
        let key = storage_key(key);
        if let Some(tree) = self.trees.get(&key) {
            return Some(tree);
        }

        if key.program == Program::Exam {
            return None;
        }

        let board = self.default_board.as_ref()?;
        if *board == key.board {
            return None;
        }

        debug!(board = %key.board, fallback = %board, "board not found; using default board");
        self.trees.get(&CurriculumKey {
            board: board.clone(),
            ..key
        })
    }
}

impl CurriculumIndex for InMemoryCurriculumIndex {
    fn lookup(&self, key: &CurriculumKey, subject_filter: Option<&[String]>) -> CurriculumTree {
        match self.resolve(key) {
            Some(tree) => apply_subject_filter(tree.clone(), subject_filter),
            None => {
                debug!(
                    program = %key.program,
                    board = %key.board,
                    level = ?key.level,
                    "no curriculum for key"
                );
                CurriculumTree::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(subjects: &[(&str, &[&str])]) -> CurriculumTree {
        let mut tree = CurriculumTree::default();
        for (subject, chapters) in subjects {
            for chapter in *chapters {
                tree.add_chapter(subject, chapter, None);
            }
        }
        tree
    }

    fn index() -> InMemoryCurriculumIndex {
        let mut index = InMemoryCurriculumIndex::new().with_default_board("CBSE");
        index.insert(
            CurriculumKey::new(Program::HighSchool, "CBSE", Some("10")),
            tree(&[("Mathematics", &["Real Numbers", "Polynomials"]), ("Science", &["Light"])]),
        );
        index.insert(
            CurriculumKey::new(Program::Exam, "JEE", None),
            tree(&[("Physics", &["Kinematics"])]),
        );
        index
    }

    fn filter(subjects: &[&str]) -> Vec<String> {
        subjects.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unknown_key_returns_empty_tree() {
        let index = index();
        let key = CurriculumKey::new(Program::HighSchool, "CBSE", Some("7"));
        assert!(index.lookup(&key, None).is_empty());
        let key = CurriculumKey::new(Program::Exam, "NEET", None);
        assert!(index.lookup(&key, None).is_empty());
    }

    #[test]
    fn filter_restricts_to_intersection() {
        let index = index();
        let key = CurriculumKey::new(Program::HighSchool, "CBSE", Some("10"));
        let requested = filter(&["Science", "History"]);
        let found = index.lookup(&key, Some(&requested));
        assert_eq!(found.subject_names(), vec!["Science".to_string()]);
    }

    #[test]
    fn empty_intersection_returns_unfiltered_tree() {
        let index = index();
        let key = CurriculumKey::new(Program::HighSchool, "CBSE", Some("10"));
        let requested = filter(&["History"]);
        let found = index.lookup(&key, Some(&requested));
        assert_eq!(found.subjects.len(), 2);
    }

    #[test]
    fn unknown_board_falls_back_to_default() {
        let index = index();
        let key = CurriculumKey::new(Program::HighSchool, "ICSE", Some("10"));
        assert_eq!(index.lookup(&key, None).chapter_count(), 3);
    }

    #[test]
    fn after_tenth_reads_high_school_tables() {
        let index = index();
        let key = CurriculumKey::new(Program::AfterTenth, "CBSE", Some("10"));
        let requested = filter(&["Mathematics"]);
        let found = index.lookup(&key, Some(&requested));
        assert_eq!(found.subject_names(), vec!["Mathematics".to_string()]);
    }

    #[test]
    fn exam_lookup_ignores_level() {
        let index = index();
        let key = CurriculumKey::new(Program::Exam, "JEE", Some("12"));
        assert_eq!(index.available_subjects(&key), vec!["Physics".to_string()]);
    }
}
