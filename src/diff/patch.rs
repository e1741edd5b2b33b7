//! Unified patches built from hunks
//!
//! Hunk and line staging work by turning (part of) a [`Hunk`] into a patch and
//! applying it to the index. The same [`PatchHunk`] can be rendered for
//! `git apply` or applied to in-memory text.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use super::{ChangeKind, FileDiff, Hunk, LineOrigin};
use crate::error::GitError;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Orientation of a partial patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The hunk's old side is the base (index → working tree, for staging)
    Forward,
    /// The hunk's new side is the base (HEAD → index, for unstaging);
    /// the patch is meant to be applied in reverse
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Context,
    Remove,
    Add,
}

impl PatchOp {
    fn prefix(self) -> char {
        match self {
            PatchOp::Context => ' ',
            PatchOp::Remove => '-',
            PatchOp::Add => '+',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchLine {
    pub op: PatchOp,
    pub text: String,
    pub no_newline: bool,
}

/// A single hunk ready to render or apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchHunk {
    pub old_start: u32,
    pub new_start: u32,
    pub lines: Vec<PatchLine>,
}

/// One line of file content for in-memory application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    pub text: String,
    pub terminated: bool,
}

pub fn split_text(content: &str) -> Vec<TextLine> {
    super::split_lines(content)
        .into_iter()
        .map(|l| TextLine {
            text: l.text.to_string(),
            terminated: l.terminated,
        })
        .collect()
}

pub fn join_text(lines: &[TextLine]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.text);
        if line.terminated {
            out.push('\n');
        }
    }
    out
}

impl PatchHunk {
    /// The entire hunk
    pub fn whole(hunk: &Hunk) -> Self {
        let all: BTreeSet<usize> = (0..hunk.lines.len()).collect();
        // Selecting every line is orientation independent
        Self::select(hunk, &all, Direction::Forward).unwrap_or(Self {
            old_start: hunk.old_start,
            new_start: hunk.new_start,
            lines: Vec::new(),
        })
    }

    /// Keep only the selected changed lines (indices into `hunk.lines`).
    ///
    /// Unselected changes on the base side become context, those on the
    /// other side are dropped. Returns `None` when nothing selected is a change.
    pub fn select(hunk: &Hunk, selected: &BTreeSet<usize>, direction: Direction) -> Option<Self> {
        let mut lines = Vec::with_capacity(hunk.lines.len());
        let mut any_change = false;

        for (index, line) in hunk.lines.iter().enumerate() {
            let chosen = selected.contains(&index);
            // Lines present in the base keep existing as context when unselected
            let on_base_side = match (line.origin, direction) {
                (LineOrigin::Context, _) => true,
                (LineOrigin::Removed, Direction::Forward) => true,
                (LineOrigin::Added, Direction::Reverse) => true,
                _ => false,
            };
            let op = match line.origin {
                LineOrigin::Context => Some(PatchOp::Context),
                LineOrigin::Removed if chosen => Some(PatchOp::Remove),
                LineOrigin::Added if chosen => Some(PatchOp::Add),
                _ if on_base_side => Some(PatchOp::Context),
                _ => None,
            };
            if let Some(op) = op {
                any_change |= op != PatchOp::Context;
                lines.push(PatchLine {
                    op,
                    text: line.content.clone(),
                    no_newline: line.no_newline,
                });
            }
        }

        if !any_change {
            return None;
        }
        normalize_final_context(&mut lines);
        Some(Self {
            old_start: hunk.old_start,
            new_start: hunk.new_start,
            lines,
        })
    }

    pub fn old_count(&self) -> u32 {
        self.lines.iter().filter(|l| l.op != PatchOp::Add).count() as u32
    }

    pub fn new_count(&self) -> u32 {
        self.lines.iter().filter(|l| l.op != PatchOp::Remove).count() as u32
    }

    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start,
            self.old_count(),
            self.new_start,
            self.new_count()
        )
    }

    /// Render as a complete single-file patch
    pub fn render(&self, path: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "diff --git a/{path} b/{path}");
        let _ = writeln!(out, "--- a/{path}");
        let _ = writeln!(out, "+++ b/{path}");
        self.render_body(&mut out);
        out
    }

    fn render_body(&self, out: &mut String) {
        let _ = writeln!(out, "{}", self.header());
        for line in &self.lines {
            out.push(line.op.prefix());
            out.push_str(&line.text);
            out.push('\n');
            if line.no_newline {
                out.push_str(NO_NEWLINE_MARKER);
                out.push('\n');
            }
        }
    }

    /// Apply to in-memory content; `reverse` applies new → old.
    ///
    /// The base must contain the patch's source side verbatim. The position
    /// from the header is tried first, then the nearest matching offset.
    pub fn apply(&self, base: &[TextLine], reverse: bool) -> Result<Vec<TextLine>, GitError> {
        // Source side lacks the lines being introduced, target lacks those going away
        let (introduced, removed, start, count) = if reverse {
            (PatchOp::Remove, PatchOp::Add, self.new_start, self.new_count())
        } else {
            (PatchOp::Add, PatchOp::Remove, self.old_start, self.old_count())
        };
        let side = |excluded: PatchOp| -> Vec<TextLine> {
            self.lines
                .iter()
                .filter(|l| l.op != excluded)
                .map(|l| TextLine {
                    text: l.text.clone(),
                    terminated: !l.no_newline,
                })
                .collect()
        };
        let from = side(introduced);
        let to = side(removed);

        let hint = (if count == 0 { start } else { start.saturating_sub(1) }) as usize;
        let position = find_position(base, &from, hint.min(base.len())).ok_or_else(|| {
            GitError::InvalidArgument(format!(
                "hunk {} does not apply to the current content",
                self.header()
            ))
        })?;

        let mut result = Vec::with_capacity(base.len() + to.len());
        result.extend_from_slice(&base[..position]);
        result.extend(to);
        result.extend_from_slice(&base[position + from.len()..]);
        Ok(result)
    }
}

/// A context line without newline can only end both sides. If added lines
/// follow it, express it as remove + re-add with a terminator.
fn normalize_final_context(lines: &mut Vec<PatchLine>) {
    let last = lines.len().saturating_sub(1);
    let Some(index) = lines
        .iter()
        .position(|l| l.op == PatchOp::Context && l.no_newline)
    else {
        return;
    };
    if index == last {
        return;
    }
    let text = lines[index].text.clone();
    lines[index].op = PatchOp::Remove;
    lines.insert(
        index + 1,
        PatchLine {
            op: PatchOp::Add,
            text,
            no_newline: false,
        },
    );
}

fn find_position(base: &[TextLine], needle: &[TextLine], hint: usize) -> Option<usize> {
    if needle.len() > base.len() {
        return None;
    }
    let max_start = base.len() - needle.len();
    let matches = |at: usize| at <= max_start && base[at..at + needle.len()] == *needle;
    if matches(hint) {
        return Some(hint);
    }
    for offset in 1..=base.len() {
        if hint >= offset && matches(hint - offset) {
            return Some(hint - offset);
        }
        if matches(hint + offset) {
            return Some(hint + offset);
        }
    }
    None
}

/// Render a whole file diff as unified text
pub fn render_file(file: &FileDiff) -> String {
    let mut out = String::new();
    let old_path = file.old_path.as_deref().unwrap_or(&file.path);
    let _ = writeln!(out, "diff --git a/{} b/{}", old_path, file.path);
    if file.kind == ChangeKind::Binary {
        let _ = writeln!(out, "Binary files a/{} and b/{} differ", old_path, file.path);
        return out;
    }
    match file.kind {
        ChangeKind::Added => {
            let _ = writeln!(out, "--- /dev/null\n+++ b/{}", file.path);
        }
        ChangeKind::Deleted => {
            let _ = writeln!(out, "--- a/{}\n+++ /dev/null", file.path);
        }
        _ => {
            let _ = writeln!(out, "--- a/{}\n+++ b/{}", old_path, file.path);
        }
    }
    for hunk in &file.hunks {
        PatchHunk::whole(hunk).render_body(&mut out);
    }
    out
}

/// Concatenated unified text for several files
pub fn render_files(files: &[FileDiff]) -> String {
    files.iter().map(render_file).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffOptions, diff_text};
    use pretty_assertions::assert_eq;

    fn only_hunk(old: &str, new: &str) -> Hunk {
        let mut hunks = diff_text(old, new, &DiffOptions::default());
        assert_eq!(hunks.len(), 1);
        hunks.remove(0)
    }

    #[test]
    fn test_render_whole_hunk() {
        let hunk = only_hunk("a\nb\nc\n", "a\nx\nc\n");
        let text = PatchHunk::whole(&hunk).render("src/file.txt");
        assert_eq!(
            text,
            "diff --git a/src/file.txt b/src/file.txt\n\
             --- a/src/file.txt\n\
             +++ b/src/file.txt\n\
             @@ -1,3 +1,3 @@\n a\n-b\n+x\n c\n"
        );
    }

    #[test]
    fn test_whole_hunk_applies_forward_and_back() {
        let old = "one\ntwo\nthree\nfour\n";
        let new = "one\n2\nthree\nfour\nfive\n";
        let hunk = only_hunk(old, new);
        let patch = PatchHunk::whole(&hunk);

        let applied = patch.apply(&split_text(old), false).unwrap();
        assert_eq!(join_text(&applied), new);

        let reverted = patch.apply(&applied, true).unwrap();
        assert_eq!(join_text(&reverted), old);
    }

    #[test]
    fn test_select_single_added_line() {
        let old = "a\nb\n";
        let new = "a\nb\nc\nd\n";
        let hunk = only_hunk(old, new);
        let c_index = hunk.lines.iter().position(|l| l.content == "c").unwrap();
        let selected = BTreeSet::from([c_index]);

        let patch = PatchHunk::select(&hunk, &selected, Direction::Forward).unwrap();
        assert_eq!(patch.old_count(), 2);
        assert_eq!(patch.new_count(), 3);
        let applied = patch.apply(&split_text(old), false).unwrap();
        assert_eq!(join_text(&applied), "a\nb\nc\n");
    }

    #[test]
    fn test_unselected_removal_becomes_context() {
        let old = "a\nb\nc\n";
        let new = "a\n";
        let hunk = only_hunk(old, new);
        let c_index = hunk.lines.iter().position(|l| l.content == "c").unwrap();

        let patch =
            PatchHunk::select(&hunk, &BTreeSet::from([c_index]), Direction::Forward).unwrap();
        let applied = patch.apply(&split_text(old), false).unwrap();
        assert_eq!(join_text(&applied), "a\nb\n");
    }

    #[test]
    fn test_reverse_selection_unstages_one_line() {
        // HEAD -> index hunk; unstage only "y"
        let head = "a\n";
        let index = "a\nx\ny\n";
        let hunk = only_hunk(head, index);
        let y_index = hunk.lines.iter().position(|l| l.content == "y").unwrap();

        let patch =
            PatchHunk::select(&hunk, &BTreeSet::from([y_index]), Direction::Reverse).unwrap();
        let result = patch.apply(&split_text(index), true).unwrap();
        assert_eq!(join_text(&result), "a\nx\n");
    }

    #[test]
    fn test_selecting_only_context_yields_nothing() {
        let hunk = only_hunk("a\nb\nc\n", "a\nx\nc\n");
        assert!(PatchHunk::select(&hunk, &BTreeSet::from([0]), Direction::Forward).is_none());
    }

    #[test]
    fn test_missing_newline_marker_and_normalization() {
        let old = "a\nb";
        let new = "a\nc";
        let hunk = only_hunk(old, new);
        let whole = PatchHunk::whole(&hunk).render("f");
        assert!(whole.contains("-b\n\\ No newline at end of file\n+c\n\\ No newline"));

        // Keep "b" but add "c" after it: "b" must gain a newline
        let c_index = hunk.lines.iter().position(|l| l.content == "c").unwrap();
        let patch =
            PatchHunk::select(&hunk, &BTreeSet::from([c_index]), Direction::Forward).unwrap();
        let applied = patch.apply(&split_text(old), false).unwrap();
        assert_eq!(join_text(&applied), "a\nb\nc");
    }

    #[test]
    fn test_stale_patch_is_rejected() {
        let hunk = only_hunk("a\nb\nc\n", "a\nx\nc\n");
        let err = PatchHunk::whole(&hunk)
            .apply(&split_text("totally\ndifferent\n"), false)
            .unwrap_err();
        assert!(matches!(err, GitError::InvalidArgument(_)));
    }

    #[test]
    fn test_applies_at_shifted_offset() {
        let hunk = only_hunk("a\nb\nc\n", "a\nx\nc\n");
        let shifted = "zero\nzero\na\nb\nc\n";
        let applied = PatchHunk::whole(&hunk)
            .apply(&split_text(shifted), false)
            .unwrap();
        assert_eq!(join_text(&applied), "zero\nzero\na\nx\nc\n");
    }

    #[test]
    fn test_render_added_file() {
        let file = FileDiff {
            path: "new.txt".to_string(),
            old_path: None,
            kind: ChangeKind::Added,
            hunks: diff_text("", "hello\n", &DiffOptions::default()),
        };
        let text = render_file(&file);
        assert!(text.contains("--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,1 @@\n+hello\n"));
    }
}
