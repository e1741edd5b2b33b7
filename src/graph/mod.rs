//! Commit graph lane layout
//!
//! [`layout`] assigns every commit of a window a column and routes an edge to
//! each parent. Input is expected children-first (reverse chronological,
//! topological). The lane table only lives for the duration of a call; the
//! same input always yields the same layout.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::git::{Commit, CommitId};

/// Number of distinct lane colors when not configured
pub const DEFAULT_PALETTE_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Stays in one column
    Direct,
    /// Changes column (forks, merges, converging lanes)
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub from_row: usize,
    pub from_column: usize,
    /// `None` when the parent lies outside the loaded window
    pub to_row: Option<usize>,
    pub to_column: usize,
    pub parent: CommitId,
    pub color: usize,
    pub kind: EdgeKind,
}

impl GraphEdge {
    pub fn is_dangling(&self) -> bool {
        self.to_row.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct GraphEntry {
    pub row: usize,
    pub commit: Arc<Commit>,
    pub column: usize,
    pub color: usize,
    /// Indices into [`GraphLayout::edges`] arriving from children above
    pub incoming: Vec<usize>,
    /// Indices into [`GraphLayout::edges`] leaving towards parents
    pub outgoing: Vec<usize>,
    /// Columns of other lanes running past this row
    pub passing: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphLayout {
    pub entries: Vec<GraphEntry>,
    pub edges: Vec<GraphEdge>,
    /// Number of columns used
    pub width: usize,
}

impl GraphLayout {
    pub fn entry(&self, id: &CommitId) -> Option<&GraphEntry> {
        self.entries.iter().find(|e| &e.commit.id == id)
    }

    pub fn outgoing(&self, entry: &GraphEntry) -> impl Iterator<Item = &GraphEdge> {
        entry.outgoing.iter().map(|&i| &self.edges[i])
    }

    pub fn incoming(&self, entry: &GraphEntry) -> impl Iterator<Item = &GraphEdge> {
        entry.incoming.iter().map(|&i| &self.edges[i])
    }
}

/// A lane waiting for `awaiting` to appear; carries the edges that end there
#[derive(Debug)]
struct Lane {
    awaiting: CommitId,
    edges: Vec<usize>,
}

struct Builder {
    palette: usize,
    lanes: Vec<Option<Lane>>,
    edges: Vec<GraphEdge>,
    width: usize,
}

impl Builder {
    fn color(&self, column: usize) -> usize {
        column % self.palette
    }

    fn lowest_free(&mut self) -> usize {
        match self.lanes.iter().position(Option::is_none) {
            Some(column) => column,
            None => {
                self.lanes.push(None);
                self.lanes.len() - 1
            }
        }
    }

    fn lowest_free_except(&mut self, reserved: usize) -> usize {
        let free = self
            .lanes
            .iter()
            .enumerate()
            .position(|(c, l)| c != reserved && l.is_none());
        match free {
            Some(column) => column,
            None => {
                self.lanes.push(None);
                self.lanes.len() - 1
            }
        }
    }

    fn occupy(&mut self, column: usize, lane: Lane) {
        self.lanes[column] = Some(lane);
        self.width = self.width.max(column + 1);
    }

    fn lane_awaiting(&self, id: &CommitId) -> Option<usize> {
        self.lanes
            .iter()
            .position(|l| l.as_ref().is_some_and(|l| &l.awaiting == id))
    }
}

/// Lay out `commits` with the default palette
pub fn layout(commits: &[Arc<Commit>]) -> GraphLayout {
    layout_with_palette(commits, DEFAULT_PALETTE_SIZE)
}

pub fn layout_with_palette(commits: &[Arc<Commit>], palette: usize) -> GraphLayout {
    let mut b = Builder {
        palette: palette.max(1),
        lanes: Vec::new(),
        edges: Vec::new(),
        width: 0,
    };
    let mut entries: Vec<GraphEntry> = Vec::with_capacity(commits.len());
    let mut placed: HashMap<&CommitId, usize> = HashMap::with_capacity(commits.len());

    for (row, commit) in commits.iter().enumerate() {
        // Every lane awaiting this commit ends here; the lowest column wins
        let mut incoming = Vec::new();
        let mut column = None;
        for c in 0..b.lanes.len() {
            let matches = b.lanes[c]
                .as_ref()
                .is_some_and(|lane| lane.awaiting == commit.id);
            if !matches {
                continue;
            }
            if let Some(lane) = b.lanes[c].take() {
                incoming.extend(lane.edges);
            }
            column.get_or_insert(c);
        }
        let column = match column {
            Some(c) => c,
            None => b.lowest_free(),
        };
        b.width = b.width.max(column + 1);
        let color = b.color(column);

        for &edge in &incoming {
            let e = &mut b.edges[edge];
            e.to_row = Some(row);
            e.to_column = column;
            e.kind = if e.from_column == column {
                EdgeKind::Direct
            } else {
                EdgeKind::Merge
            };
        }

        let passing: Vec<usize> = b
            .lanes
            .iter()
            .enumerate()
            .filter(|(c, l)| *c != column && l.is_some())
            .map(|(c, _)| c)
            .collect();

        let mut outgoing = Vec::with_capacity(commit.parents.len());
        for (index, parent) in commit.parents.iter().enumerate() {
            let edge = b.edges.len();
            outgoing.push(edge);

            // Parent already laid out above: the caller broke topological order
            if let Some(&parent_row) = placed.get(parent) {
                let to_column: usize = entries[parent_row].column;
                b.edges.push(GraphEdge {
                    from_row: row,
                    from_column: column,
                    to_row: Some(parent_row),
                    to_column,
                    parent: parent.clone(),
                    color: b.color(to_column),
                    kind: if to_column == column {
                        EdgeKind::Direct
                    } else {
                        EdgeKind::Merge
                    },
                });
                entries[parent_row].incoming.push(edge);
                continue;
            }

            let lane_column = if index == 0 && b.lanes[column].is_none() {
                column
            } else if let Some(existing) = b.lane_awaiting(parent) {
                existing
            } else {
                // The commit's own column stays reserved even when its lane is empty
                b.lowest_free_except(column)
            };

            b.edges.push(GraphEdge {
                from_row: row,
                from_column: column,
                to_row: None,
                to_column: lane_column,
                parent: parent.clone(),
                color: b.color(lane_column),
                kind: if lane_column == column {
                    EdgeKind::Direct
                } else {
                    EdgeKind::Merge
                },
            });

            match b.lanes[lane_column].as_mut() {
                Some(lane) => lane.edges.push(edge),
                None => b.occupy(
                    lane_column,
                    Lane {
                        awaiting: parent.clone(),
                        edges: vec![edge],
                    },
                ),
            }
        }

        placed.insert(&commit.id, row);
        entries.push(GraphEntry {
            row,
            commit: Arc::clone(commit),
            column,
            color,
            incoming,
            outgoing,
            passing,
        });
    }

    GraphLayout {
        entries,
        edges: b.edges,
        width: b.width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use crate::git::Signature;

    fn id(n: usize) -> CommitId {
        CommitId::parse(&format!("{n:040x}")).unwrap()
    }

    fn commit(n: usize, parents: &[usize]) -> Arc<Commit> {
        let sig = Signature {
            name: "Test".into(),
            email: "test@example.com".into(),
            time: Utc.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap(),
        };
        Arc::new(Commit {
            id: id(n),
            parents: parents.iter().map(|p| id(*p)).collect(),
            author: sig.clone(),
            committer: sig,
            message: format!("commit {n}"),
        })
    }

    fn columns(layout: &GraphLayout) -> Vec<usize> {
        layout.entries.iter().map(|e| e.column).collect()
    }

    #[test]
    fn test_second_parent_never_shares_column_when_first_is_placed() {
        // 1 is listed before its child 4, which merges 1 and 3
        let commits = vec![commit(1, &[]), commit(4, &[1, 3]), commit(3, &[])];
        let layout = layout(&commits);

        let merge = &layout.entries[1];
        assert_eq!(merge.column, 0);
        let out: Vec<_> = layout.outgoing(merge).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].to_row, Some(0));
        assert_eq!(out[1].kind, EdgeKind::Merge);
        assert_ne!(out[1].to_column, merge.column);
        assert_eq!(layout.entries[2].column, out[1].to_column);
    }

    #[test]
    fn test_linear_history_single_column() {
        let commits = vec![commit(3, &[2]), commit(2, &[1]), commit(1, &[])];
        let layout = layout(&commits);

        assert_eq!(columns(&layout), vec![0, 0, 0]);
        assert_eq!(layout.width, 1);
        assert_eq!(layout.edges.len(), 2);
        assert!(layout.edges.iter().all(|e| e.kind == EdgeKind::Direct));
        assert!(layout.entries.iter().all(|e| e.color == 0));
    }

    #[test]
    fn test_merge_opens_second_column() {
        // M merges B into A; both descend from R
        let commits = vec![
            commit(4, &[2, 3]), // M
            commit(3, &[1]),    // B
            commit(2, &[1]),    // A
            commit(1, &[]),     // R
        ];
        let layout = layout(&commits);

        let m = &layout.entries[0];
        assert_eq!(m.column, 0);
        let out: Vec<_> = layout.outgoing(m).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, EdgeKind::Direct);
        assert_eq!(out[0].to_column, 0);
        assert_eq!(out[1].kind, EdgeKind::Merge);
        assert_eq!(out[1].to_column, 1);

        assert_eq!(layout.entries[1].column, 1); // B
        assert_eq!(layout.entries[2].column, 0); // A
        assert_eq!(layout.entries[3].column, 0); // R: lowest awaiting lane wins
        assert_eq!(layout.entries[1].color, 1);
        assert_eq!(layout.width, 2);

        // B's edge converges back into column 0
        let converging: Vec<_> = layout.incoming(&layout.entries[3]).collect();
        assert_eq!(converging.len(), 2);
        assert!(converging.iter().any(|e| e.kind == EdgeKind::Merge && e.from_column == 1));
    }

    #[test]
    fn test_off_window_parent_dangles() {
        let commits = vec![commit(3, &[2]), commit(2, &[1])];
        let layout = layout(&commits);
        let last = layout.outgoing(&layout.entries[1]).next().unwrap();
        assert!(last.is_dangling());
        assert_eq!(last.parent, id(1));
        assert_eq!(last.to_column, 0);
    }

    #[test]
    fn test_criss_cross_tie_break_lowest_column() {
        // Two merges each with parents {A, B} in opposite order
        let commits = vec![
            commit(10, &[11, 12]), // tip
            commit(11, &[1, 2]),   // M1
            commit(12, &[2, 1]),   // M2
            commit(1, &[0]),       // A
            commit(2, &[0]),       // B
            commit(0, &[]),
        ];
        let layout = layout(&commits);
        let col = |n: usize| layout.entry(&id(n)).unwrap().column;

        assert_eq!(col(10), 0);
        assert_eq!(col(11), 0);
        assert_eq!(col(12), 1);
        // M2's second parent joins the lane M1 already reserved for A
        assert_eq!(col(1), 0);
        // B is awaited by lane 1 (M2 first parent) and lane 2 (opened by M1)
        assert_eq!(col(2), 1);
        assert_eq!(col(0), 0);

        // Re-running yields the identical layout
        let again = super::layout(&commits);
        assert_eq!(columns(&layout), columns(&again));
        assert_eq!(layout.edges, again.edges);
    }

    #[test]
    fn test_merge_parents_never_share_new_lane() {
        // Octopus merge: three parents, each gets its own column
        let commits = vec![
            commit(9, &[1, 2, 3]),
            commit(1, &[0]),
            commit(2, &[0]),
            commit(3, &[0]),
            commit(0, &[]),
        ];
        let layout = layout(&commits);
        let out: Vec<usize> = layout
            .outgoing(&layout.entries[0])
            .map(|e| e.to_column)
            .collect();
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[test]
    fn test_palette_wraps() {
        let commits = vec![
            commit(9, &[1, 2, 3]),
            commit(1, &[]),
            commit(2, &[]),
            commit(3, &[]),
        ];
        let layout = layout_with_palette(&commits, 2);
        let colors: Vec<usize> = layout.entries.iter().map(|e| e.color).collect();
        assert_eq!(colors, vec![0, 0, 1, 0]);
    }

    #[test]
    fn test_out_of_order_parent_connects_immediately() {
        // Parent listed before child
        let commits = vec![commit(1, &[]), commit(2, &[1])];
        let layout = layout(&commits);
        let edge = &layout.edges[0];
        assert_eq!(edge.to_row, Some(0));
        assert!(layout.entries[0].incoming.contains(&0));
    }

    #[test]
    fn test_passing_lanes_recorded() {
        let commits = vec![
            commit(4, &[2, 3]),
            commit(3, &[1]),
            commit(2, &[1]),
            commit(1, &[]),
        ];
        let layout = layout(&commits);
        // While A (column 0) is drawn, B's lane in column 1 runs past
        assert_eq!(layout.entries[2].passing, vec![1]);
    }

    #[test]
    fn test_empty_input() {
        let layout = layout(&[]);
        assert!(layout.entries.is_empty());
        assert_eq!(layout.width, 0);
    }

    fn arbitrary_dag() -> impl Strategy<Value = Vec<Arc<Commit>>> {
        // Commit n may only point at commits < n, emitted children-first
        prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), 1..40)
            .prop_map(|parent_picks| {
                let n = parent_picks.len();
                let mut commits = Vec::with_capacity(n);
                for (i, picks) in parent_picks.iter().enumerate().rev() {
                    let mut parents: Vec<usize> = Vec::new();
                    if i > 0 {
                        for pick in picks {
                            let p = pick.index(i);
                            if !parents.contains(&p) {
                                parents.push(p);
                            }
                        }
                    }
                    commits.push(commit(i, &parents));
                }
                commits
            })
    }

    proptest! {
        #[test]
        fn prop_every_edge_within_width(commits in arbitrary_dag()) {
            let layout = layout(&commits);
            prop_assert_eq!(layout.entries.len(), commits.len());
            for entry in &layout.entries {
                prop_assert!(entry.column < layout.width);
                prop_assert_eq!(entry.color, entry.column % DEFAULT_PALETTE_SIZE);
            }
            for edge in &layout.edges {
                prop_assert!(edge.from_column < layout.width);
                prop_assert!(edge.to_column < layout.width);
                if let Some(row) = edge.to_row {
                    prop_assert_eq!(layout.entries[row].column, edge.to_column);
                    prop_assert_eq!(&layout.entries[row].commit.id, &edge.parent);
                }
                let direct = edge.from_column == edge.to_column;
                prop_assert_eq!(edge.kind == EdgeKind::Direct, direct);
            }
        }

        #[test]
        fn prop_layout_is_deterministic(commits in arbitrary_dag()) {
            let a = layout(&commits);
            let b = layout(&commits);
            prop_assert_eq!(&a.edges, &b.edges);
            prop_assert_eq!(columns(&a), columns(&b));
        }
    }
}
