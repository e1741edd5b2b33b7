//! External change detection
//!
//! Watches a repository's control directory and turns file activity into
//! debounced invalidations of cached state sections. The watcher never reads
//! the repository itself; the cache reschedules reads for stale sections.

mod debounce;
mod watcher;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Component, Path};

pub use debounce::Debouncer;
pub use watcher::RepoWatcher;

use crate::state::RepoId;

/// Set of cached state sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sections(u8);

impl Sections {
    pub const NONE: Sections = Sections(0);
    pub const REFS: Sections = Sections(1);
    pub const COMMITS: Sections = Sections(1 << 1);
    pub const STATUS: Sections = Sections(1 << 2);
    pub const DIFF: Sections = Sections(1 << 3);
    pub const CONFLICT: Sections = Sections(1 << 4);
    pub const ALL: Sections = Sections(0b1_1111);

    const NAMES: [(Sections, &'static str); 5] = [
        (Sections::REFS, "refs"),
        (Sections::COMMITS, "commits"),
        (Sections::STATUS, "status"),
        (Sections::DIFF, "diff"),
        (Sections::CONFLICT, "conflict"),
    ];

    pub fn contains(self, other: Sections) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Sections) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Sections) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Sections) {
        self.0 &= !other.0;
    }

    pub fn without(self, other: Sections) -> Sections {
        Sections(self.0 & !other.0)
    }

    /// Names of the contained sections
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(s, _)| self.contains(*s))
            .map(|(_, n)| *n)
            .collect()
    }
}

impl BitOr for Sections {
    type Output = Sections;

    fn bitor(self, rhs: Sections) -> Sections {
        Sections(self.0 | rhs.0)
    }
}

impl BitOrAssign for Sections {
    fn bitor_assign(&mut self, rhs: Sections) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Sections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}

/// Notification from a repository watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Sections went stale after a quiet period
    Invalidated { repo: RepoId, sections: Sections },
    /// The control directory vanished or the backend failed
    Lost { repo: RepoId, reason: String },
}

impl WatchEvent {
    pub fn repo(&self) -> RepoId {
        match self {
            WatchEvent::Invalidated { repo, .. } | WatchEvent::Lost { repo, .. } => *repo,
        }
    }
}

/// Sections affected by a change to `relative` (a path inside the control directory)
pub fn classify(relative: &Path) -> Sections {
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    let Some(first) = parts.first().copied() else {
        return Sections::NONE;
    };
    let name = parts.last().copied().unwrap_or(first);

    // Lock files come and go around every ref and index update
    if name.ends_with(".lock") {
        return Sections::NONE;
    }

    match first {
        "HEAD" | "packed-refs" | "ORIG_HEAD" | "FETCH_HEAD" if parts.len() == 1 => {
            Sections::REFS | Sections::COMMITS | Sections::STATUS
        }
        "refs" => Sections::REFS | Sections::COMMITS | Sections::STATUS,
        "index" if parts.len() == 1 => Sections::STATUS | Sections::DIFF,
        "MERGE_HEAD" | "CHERRY_PICK_HEAD" | "REVERT_HEAD" | "MERGE_MSG" if parts.len() == 1 => {
            Sections::CONFLICT | Sections::STATUS
        }
        "rebase-merge" | "rebase-apply" | "sequencer" => Sections::CONFLICT | Sections::STATUS,
        _ => Sections::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_control_files() {
        let refs = Sections::REFS | Sections::COMMITS | Sections::STATUS;
        assert_eq!(classify(Path::new("HEAD")), refs);
        assert_eq!(classify(Path::new("refs/heads/main")), refs);
        assert_eq!(classify(Path::new("refs/remotes/origin/feature/x")), refs);
        assert_eq!(classify(Path::new("packed-refs")), refs);
        assert_eq!(
            classify(Path::new("index")),
            Sections::STATUS | Sections::DIFF
        );
        assert_eq!(
            classify(Path::new("rebase-merge/done")),
            Sections::CONFLICT | Sections::STATUS
        );
        assert_eq!(
            classify(Path::new("MERGE_HEAD")),
            Sections::CONFLICT | Sections::STATUS
        );
    }

    #[test]
    fn test_classify_ignores_noise() {
        assert!(classify(Path::new("objects/ab/cdef")).is_empty());
        assert!(classify(Path::new("logs/HEAD")).is_empty());
        assert!(classify(Path::new("index.lock")).is_empty());
        assert!(classify(Path::new("refs/heads/main.lock")).is_empty());
        assert!(classify(Path::new("config")).is_empty());
        assert!(classify(Path::new("")).is_empty());
    }

    #[test]
    fn test_sections_set_operations() {
        let mut s = Sections::REFS | Sections::DIFF;
        assert!(s.contains(Sections::REFS));
        assert!(!s.contains(Sections::REFS | Sections::STATUS));
        assert!(s.intersects(Sections::REFS | Sections::STATUS));
        s.remove(Sections::REFS);
        assert_eq!(s, Sections::DIFF);
        s |= Sections::CONFLICT;
        assert_eq!(s.to_string(), "diff|conflict");
        assert_eq!(Sections::ALL.names().len(), 5);
        assert_eq!(Sections::NONE.to_string(), "none");
    }
}
