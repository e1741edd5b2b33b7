//! Side-by-side rows for a two-column diff view

use serde::Serialize;

use super::hunks::change_blocks;
use super::{DiffLine, Hunk, LineOrigin};

/// One row of a side-by-side rendering.
///
/// `left` is the old side (context or removal), `right` the new side (context
/// or addition). A side is `None` where the other has no counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitRow<'a> {
    pub left: Option<&'a DiffLine>,
    pub right: Option<&'a DiffLine>,
}

impl SplitRow<'_> {
    /// Both sides hold a change
    pub fn is_paired_change(&self) -> bool {
        matches!(
            (self.left, self.right),
            (Some(l), Some(r)) if l.origin == LineOrigin::Removed && r.origin == LineOrigin::Added
        )
    }
}

/// Rows for a hunk's lines.
///
/// Context lines fill both sides. A removed run and the added run right after
/// it pair up index by index; the surplus of the longer run keeps one side
/// empty. Additions without a preceding removal only fill the right side.
pub fn split_rows(lines: &[DiffLine]) -> Vec<SplitRow<'_>> {
    let mut blocks = change_blocks(lines).into_iter().peekable();
    let mut rows = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if let Some(block) = blocks.next_if(|b| b.removed.start == i) {
            let height = block.removed.len().max(block.added.len());
            for p in 0..height {
                rows.push(SplitRow {
                    left: block.removed.clone().nth(p).map(|k| &lines[k]),
                    right: block.added.clone().nth(p).map(|k| &lines[k]),
                });
            }
            i = block.added.end;
            continue;
        }

        let line = &lines[i];
        rows.push(match line.origin {
            LineOrigin::Context => SplitRow {
                left: Some(line),
                right: Some(line),
            },
            LineOrigin::Removed => SplitRow {
                left: Some(line),
                right: None,
            },
            LineOrigin::Added => SplitRow {
                left: None,
                right: Some(line),
            },
        });
        i += 1;
    }
    rows
}

pub fn split_hunk(hunk: &Hunk) -> Vec<SplitRow<'_>> {
    split_rows(&hunk.lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffOptions, diff_text};
    use pretty_assertions::assert_eq;

    fn sides<'a>(rows: &[SplitRow<'a>]) -> Vec<(Option<&'a str>, Option<&'a str>)> {
        rows.iter()
            .map(|r| {
                (
                    r.left.map(|l| l.content.as_str()),
                    r.right.map(|l| l.content.as_str()),
                )
            })
            .collect()
    }

    #[test]
    fn test_replacement_pairs_side_by_side() {
        let hunks = diff_text(
            "a\nold one\nold two\nc\n",
            "a\nnew one\nnew two\nc\n",
            &DiffOptions::default(),
        );
        let rows = split_hunk(&hunks[0]);
        assert_eq!(
            sides(&rows),
            vec![
                (Some("a"), Some("a")),
                (Some("old one"), Some("new one")),
                (Some("old two"), Some("new two")),
                (Some("c"), Some("c")),
            ]
        );
        assert!(rows[1].is_paired_change());
        assert!(!rows[0].is_paired_change());
        // word spans travel with the borrowed lines
        assert!(!rows[1].left.unwrap().word_changes.is_empty());
    }

    #[test]
    fn test_uneven_runs_leave_one_side_empty() {
        let hunks = diff_text(
            "x\nr1\nr2\nr3\ny\n",
            "x\na1\ny\nextra\n",
            &DiffOptions::default(),
        );
        let rows = split_hunk(&hunks[0]);
        assert_eq!(
            sides(&rows),
            vec![
                (Some("x"), Some("x")),
                (Some("r1"), Some("a1")),
                (Some("r2"), None),
                (Some("r3"), None),
                (Some("y"), Some("y")),
                (None, Some("extra")),
            ]
        );
    }

    #[test]
    fn test_pure_insertion_and_deletion() {
        let hunks = diff_text("a\nb\ngone\n", "a\ninserted\nb\n", &DiffOptions::default());
        let rows = split_hunk(&hunks[0]);
        assert_eq!(
            sides(&rows),
            vec![
                (Some("a"), Some("a")),
                (None, Some("inserted")),
                (Some("b"), Some("b")),
                (Some("gone"), None),
            ]
        );
        assert!(split_rows(&[]).is_empty());
    }
}
