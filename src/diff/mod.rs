//! Line and word level diff engine
//!
//! Pure computation: two texts in, aligned hunks out. No I/O and no shared state.
//!
//! - [`diff_lines`] / [`diff_text`] - hunks for two line sequences
//! - [`diff_file`] - a [`FileDiff`] for two blobs, with binary detection
//! - [`patch`] - unified patches for whole hunks or selected lines
//! - [`split`] - side-by-side rows for a hunk

mod histogram;
mod hunks;
pub mod patch;
pub mod split;
mod words;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_64;

pub use split::{SplitRow, split_hunk};

use crate::error::GitError;

/// Number of leading bytes inspected by the binary heuristic
pub const BINARY_SNIFF_LEN: usize = 8000;

/// Default number of context lines around a change
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// How a file changed between the two sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    Renamed,
    Binary,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Added => "added",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Modified => "modified",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Binary => "binary",
        };
        f.write_str(label)
    }
}

/// Which side(s) of the diff a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOrigin {
    Context,
    Added,
    Removed,
}

impl LineOrigin {
    /// Unified diff prefix character
    pub fn prefix(self) -> char {
        match self {
            LineOrigin::Context => ' ',
            LineOrigin::Added => '+',
            LineOrigin::Removed => '-',
        }
    }
}

/// Byte range within a line's content that changed inside a replacement pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WordChange {
    pub start: usize,
    pub end: usize,
}

impl WordChange {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub origin: LineOrigin,
    /// 1-based line number on the old side (absent for added lines)
    pub old_lineno: Option<u32>,
    /// 1-based line number on the new side (absent for removed lines)
    pub new_lineno: Option<u32>,
    /// Raw line content without its terminator
    pub content: String,
    /// The line is the last one of its file and has no trailing newline
    pub no_newline: bool,
    /// Changed spans, populated only on paired replacement lines
    pub word_changes: Vec<WordChange>,
}

/// Stable fingerprint of a hunk's content.
///
/// Computed from the hunk's lines (not its position) so a hunk keeps its id
/// when an earlier hunk of the same file is staged and the ranges shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HunkId(pub u64);

impl fmt::Display for HunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A contiguous region of change with surrounding context.
///
/// Ranges follow unified-diff conventions: a zero count means the start names
/// the line *after which* the change applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hunk {
    pub id: HunkId,
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// `@@ -a,b +c,d @@`
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }

    pub fn added(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.origin == LineOrigin::Added)
            .count()
    }

    pub fn removed(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.origin == LineOrigin::Removed)
            .count()
    }

    /// Indices of added/removed lines (the lines a caller may select)
    pub fn changed_line_indices(&self) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.origin != LineOrigin::Context)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Differences for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub path: String,
    /// Previous path when the file was renamed
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    pub fn is_binary(&self) -> bool {
        self.kind == ChangeKind::Binary
    }

    /// (lines added, lines removed)
    pub fn stats(&self) -> (usize, usize) {
        self.hunks
            .iter()
            .fold((0, 0), |(a, r), h| (a + h.added(), r + h.removed()))
    }

    pub fn hunk(&self, id: HunkId) -> Option<&Hunk> {
        self.hunks.iter().find(|h| h.id == id)
    }

    /// `old -> new` for renames, otherwise the path
    pub fn display_path(&self) -> String {
        match &self.old_path {
            Some(old) if old != &self.path => format!("{} -> {}", old, self.path),
            _ => self.path.clone(),
        }
    }
}

/// Summary line for a set of file diffs, e.g. `3 file(s), +10 -2 lines`
pub fn summarize(files: &[FileDiff]) -> String {
    if files.is_empty() {
        return "No changes".to_string();
    }
    let (added, removed) = files.iter().fold((0, 0), |(a, r), f| {
        let (fa, fr) = f.stats();
        (a + fa, r + fr)
    });
    format!("{} file(s), +{} -{} lines", files.len(), added, removed)
}

/// What to do with content that looks binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryMode {
    /// Report a `binary` FileDiff without hunks
    #[default]
    Detect,
    /// Fail with [`GitError::BinaryContentUnsupported`]
    Reject,
    /// Diff as (lossily decoded) text regardless
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOptions {
    pub context_lines: usize,
    /// Compute word spans on paired replacement lines
    pub word_diff: bool,
    /// Lines longer than this (bytes) are never word-diffed
    pub max_word_diff_line_len: usize,
    pub binary: BinaryMode,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context_lines: DEFAULT_CONTEXT_LINES,
            word_diff: true,
            max_word_diff_line_len: 1000,
            binary: BinaryMode::Detect,
        }
    }
}

/// One line of input: text without terminator, plus whether it had one.
///
/// `"a\n"` and a final `"a"` are different lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Line<'a> {
    pub text: &'a str,
    pub terminated: bool,
}

pub(crate) fn split_lines(text: &str) -> Vec<Line<'_>> {
    text.split_inclusive('\n')
        .map(|raw| match raw.strip_suffix('\n') {
            Some(text) => Line {
                text,
                terminated: true,
            },
            None => Line {
                text: raw,
                terminated: false,
            },
        })
        .collect()
}

/// Diff two line sequences (each line without its terminator)
pub fn diff_lines(old: &[&str], new: &[&str], options: &DiffOptions) -> Vec<Hunk> {
    fn as_lines<'a>(lines: &[&'a str]) -> Vec<Line<'a>> {
        lines
            .iter()
            .map(|text| Line {
                text,
                terminated: true,
            })
            .collect()
    }
    compute(&as_lines(old), &as_lines(new), options)
}

/// Diff two texts, splitting on `\n`
pub fn diff_text(old: &str, new: &str, options: &DiffOptions) -> Vec<Hunk> {
    compute(&split_lines(old), &split_lines(new), options)
}

/// Null byte within the first [`BINARY_SNIFF_LEN`] bytes
pub fn is_binary(content: &[u8]) -> bool {
    content[..content.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

/// Both sides of one file; `None` when the file is absent on that side
#[derive(Debug, Clone, Copy)]
pub struct DiffInput<'a> {
    pub path: &'a str,
    pub old_path: Option<&'a str>,
    pub kind: ChangeKind,
    pub old: Option<&'a [u8]>,
    pub new: Option<&'a [u8]>,
}

/// Build the [`FileDiff`] for one file
pub fn diff_file(input: DiffInput<'_>, options: &DiffOptions) -> Result<FileDiff, GitError> {
    let old = input.old.unwrap_or_default();
    let new = input.new.unwrap_or_default();
    let old_path = input.old_path.map(str::to_string);

    if options.binary != BinaryMode::Text && (is_binary(old) || is_binary(new)) {
        if options.binary == BinaryMode::Reject {
            return Err(GitError::BinaryContentUnsupported(input.path.to_string()));
        }
        return Ok(FileDiff {
            path: input.path.to_string(),
            old_path,
            kind: ChangeKind::Binary,
            hunks: Vec::new(),
        });
    }

    let old = String::from_utf8_lossy(old);
    let new = String::from_utf8_lossy(new);
    Ok(FileDiff {
        path: input.path.to_string(),
        old_path,
        kind: input.kind,
        hunks: diff_text(&old, &new, options),
    })
}

fn compute<'a>(old: &[Line<'a>], new: &[Line<'a>], options: &DiffOptions) -> Vec<Hunk> {
    // Intern lines in order of first appearance so token ids (and therefore
    // tie-breaks) never depend on hash iteration order.
    let mut interner: HashMap<Line<'a>, u32> = HashMap::new();
    let mut intern = |line: &Line<'a>| -> u32 {
        let next = interner.len() as u32;
        *interner.entry(*line).or_insert(next)
    };
    let old_tokens: Vec<u32> = old.iter().map(&mut intern).collect();
    let new_tokens: Vec<u32> = new.iter().map(&mut intern).collect();

    let alignment = histogram::align(&old_tokens, &new_tokens);
    let mut hunks = hunks::build(old, new, &alignment, options);
    assign_ids(&mut hunks);
    hunks
}

fn assign_ids(hunks: &mut [Hunk]) {
    let mut seen: HashMap<u64, u32> = HashMap::new();
    for hunk in hunks.iter_mut() {
        let mut buf = Vec::new();
        for line in &hunk.lines {
            buf.push(line.origin.prefix() as u8);
            buf.extend_from_slice(line.content.as_bytes());
            buf.push(if line.no_newline { b'\\' } else { b'\n' });
        }
        let base = xxh3_64(&buf);
        let occurrence = seen.entry(base).or_insert(0);
        hunk.id = if *occurrence == 0 {
            HunkId(base)
        } else {
            let mut salted = base.to_le_bytes().to_vec();
            salted.extend_from_slice(&occurrence.to_le_bytes());
            HunkId(xxh3_64(&salted))
        };
        *occurrence += 1;
    }
}
