//! Turn a line alignment into context-bounded hunks

use std::ops::Range;

use super::histogram::Alignment;
use super::words::word_spans;
use super::{DiffLine, DiffOptions, Hunk, HunkId, Line, LineOrigin};

#[derive(Debug, Clone, Copy)]
struct Row {
    origin: LineOrigin,
    /// Old/new positions (0-based) before this row is consumed
    old_idx: usize,
    new_idx: usize,
}

pub(super) fn build(
    old: &[Line<'_>],
    new: &[Line<'_>],
    alignment: &Alignment,
    options: &DiffOptions,
) -> Vec<Hunk> {
    let rows = rows(old, new, alignment);
    let ctx = options.context_lines;

    let changes: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.origin != LineOrigin::Context)
        .map(|(i, _)| i)
        .collect();
    let Some((&first, rest)) = changes.split_first() else {
        return Vec::new();
    };

    let mut groups = Vec::new();
    let mut start = first.saturating_sub(ctx);
    let mut end = first + 1;
    for &change in rest {
        if change - end <= 2 * ctx {
            end = change + 1;
        } else {
            groups.push(start..(end + ctx).min(rows.len()));
            start = change.saturating_sub(ctx);
            end = change + 1;
        }
    }
    groups.push(start..(end + ctx).min(rows.len()));

    groups
        .into_iter()
        .map(|range| make_hunk(&rows[range], old, new, options))
        .collect()
}

fn rows(old: &[Line<'_>], new: &[Line<'_>], alignment: &Alignment) -> Vec<Row> {
    let mut rows = Vec::with_capacity(old.len().max(new.len()));
    let (mut i, mut j) = (0, 0);
    while i < old.len() || j < new.len() {
        let origin = if i < old.len() && (alignment.removed[i] || j >= new.len()) {
            LineOrigin::Removed
        } else if j < new.len() && (alignment.added[j] || i >= old.len()) {
            LineOrigin::Added
        } else {
            LineOrigin::Context
        };
        rows.push(Row {
            origin,
            old_idx: i,
            new_idx: j,
        });
        match origin {
            LineOrigin::Removed => i += 1,
            LineOrigin::Added => j += 1,
            LineOrigin::Context => {
                i += 1;
                j += 1;
            }
        }
    }
    rows
}

fn make_hunk(rows: &[Row], old: &[Line<'_>], new: &[Line<'_>], options: &DiffOptions) -> Hunk {
    let mut lines = Vec::with_capacity(rows.len());
    let (mut old_count, mut new_count) = (0u32, 0u32);

    for row in rows {
        let line = match row.origin {
            LineOrigin::Context => {
                old_count += 1;
                new_count += 1;
                let src = old[row.old_idx];
                DiffLine {
                    origin: LineOrigin::Context,
                    old_lineno: Some(row.old_idx as u32 + 1),
                    new_lineno: Some(row.new_idx as u32 + 1),
                    content: src.text.to_string(),
                    no_newline: !src.terminated,
                    word_changes: Vec::new(),
                }
            }
            LineOrigin::Removed => {
                old_count += 1;
                let src = old[row.old_idx];
                DiffLine {
                    origin: LineOrigin::Removed,
                    old_lineno: Some(row.old_idx as u32 + 1),
                    new_lineno: None,
                    content: src.text.to_string(),
                    no_newline: !src.terminated,
                    word_changes: Vec::new(),
                }
            }
            LineOrigin::Added => {
                new_count += 1;
                let src = new[row.new_idx];
                DiffLine {
                    origin: LineOrigin::Added,
                    old_lineno: None,
                    new_lineno: Some(row.new_idx as u32 + 1),
                    content: src.text.to_string(),
                    no_newline: !src.terminated,
                    word_changes: Vec::new(),
                }
            }
        };
        lines.push(line);
    }

    let first = rows[0];
    let old_start = first.old_idx as u32 + u32::from(old_count > 0);
    let new_start = first.new_idx as u32 + u32::from(new_count > 0);

    if options.word_diff {
        pair_replacements(&mut lines, options.max_word_diff_line_len);
    }

    Hunk {
        // Filled in once all hunks of the file are known
        id: HunkId(0),
        old_start,
        old_count,
        new_start,
        new_count,
        lines,
    }
}

/// A run of removed lines and the run of added lines directly after it
/// (possibly empty), as indices into a hunk's lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ChangeBlock {
    pub removed: Range<usize>,
    pub added: Range<usize>,
}

impl ChangeBlock {
    /// Runs of comparable length: the longer is at most twice the shorter
    fn is_replacement(&self) -> bool {
        let (removed, added) = (self.removed.len(), self.added.len());
        let (short, long) = (removed.min(added), removed.max(added));
        short > 0 && long <= 2 * short
    }

    /// Removed/added index pairs, formed index by index up to the shorter run
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.removed.clone().zip(self.added.clone())
    }
}

/// Every maximal removed run in `lines`, with the added run following it
pub(super) fn change_blocks(lines: &[DiffLine]) -> Vec<ChangeBlock> {
    let mut blocks = Vec::new();
    let mut k = 0;
    while k < lines.len() {
        if lines[k].origin != LineOrigin::Removed {
            k += 1;
            continue;
        }
        let removed_start = k;
        while k < lines.len() && lines[k].origin == LineOrigin::Removed {
            k += 1;
        }
        let added_start = k;
        while k < lines.len() && lines[k].origin == LineOrigin::Added {
            k += 1;
        }
        blocks.push(ChangeBlock {
            removed: removed_start..added_start,
            added: added_start..k,
        });
    }
    blocks
}

/// Word-diff each removed/added pair of a replacement block
fn pair_replacements(lines: &mut [DiffLine], max_len: usize) {
    for block in change_blocks(lines) {
        if !block.is_replacement() {
            continue;
        }
        for (ri, ai) in block.pairs() {
            if lines[ri].content.len() > max_len || lines[ai].content.len() > max_len {
                continue;
            }
            let (old_spans, new_spans) = word_spans(&lines[ri].content, &lines[ai].content);
            lines[ri].word_changes = old_spans;
            lines[ai].word_changes = new_spans;
        }
    }
}
