//! Parsers for git's machine-readable output formats
//!
//! All parsers are pure so they can be tested without a repository.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use super::types::{
    BlameLine, BlobHandle, BranchStatus, Commit, CommitId, ConflictedPath, Ref, RefKind,
    Signature, StatusEntry, StatusReport,
};
use crate::diff::ChangeKind;
use crate::error::GitError;

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';

/// `--format` producing records for [`parse_log`]
pub const LOG_FORMAT: &str = "--format=%H%x1f%P%x1f%an%x1f%ae%x1f%at%x1f%cn%x1f%ce%x1f%ct%x1f%B%x1e";

/// `git stash list --format` producing lines for [`parse_stash_list`]
pub const STASH_FORMAT: &str = "--format=%H%x1f%gd";

fn malformed(what: &str, detail: impl std::fmt::Display) -> GitError {
    GitError::RepositoryCorrupt(format!("unexpected {what} output: {detail}"))
}

fn timestamp(secs: &str) -> DateTime<Utc> {
    secs.trim()
        .parse::<i64>()
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or_default()
}

/// Split NUL-terminated output into UTF-8 tokens (lossy), skipping the empty tail
fn nul_tokens(output: &[u8]) -> impl Iterator<Item = String> + '_ {
    output
        .split(|b| *b == 0)
        .filter(|t| !t.is_empty())
        .map(|t| String::from_utf8_lossy(t).into_owned())
}

fn status_kind(code: char) -> Option<ChangeKind> {
    match code {
        'M' | 'T' => Some(ChangeKind::Modified),
        'A' | 'C' => Some(ChangeKind::Added),
        'D' => Some(ChangeKind::Deleted),
        'R' => Some(ChangeKind::Renamed),
        _ => None,
    }
}

fn xy(field: &str) -> (Option<ChangeKind>, Option<ChangeKind>) {
    let mut chars = field.chars();
    let x = chars.next().and_then(status_kind);
    let y = chars.next().and_then(status_kind);
    (x, y)
}

/// `git status --porcelain=v2 -z --branch`
pub fn parse_status_v2(output: &[u8]) -> Result<StatusReport, GitError> {
    let mut report = StatusReport::default();
    let mut tokens = nul_tokens(output);

    while let Some(token) = tokens.next() {
        let Some((tag, rest)) = token.split_once(' ') else {
            return Err(malformed("status", &token));
        };
        match tag {
            "#" => parse_branch_header(rest, &mut report.branch),
            "1" => {
                let fields: Vec<&str> = rest.splitn(8, ' ').collect();
                if fields.len() != 8 {
                    return Err(malformed("status", &token));
                }
                let (staged, unstaged) = xy(fields[0]);
                report.entries.push(StatusEntry {
                    path: fields[7].to_string(),
                    orig_path: None,
                    staged,
                    unstaged,
                    conflicted: false,
                    untracked: false,
                });
            }
            "2" => {
                let fields: Vec<&str> = rest.splitn(9, ' ').collect();
                if fields.len() != 9 {
                    return Err(malformed("status", &token));
                }
                let orig = tokens.next().ok_or_else(|| malformed("status", &token))?;
                let (staged, unstaged) = xy(fields[0]);
                report.entries.push(StatusEntry {
                    path: fields[8].to_string(),
                    orig_path: Some(orig),
                    staged,
                    unstaged,
                    conflicted: false,
                    untracked: false,
                });
            }
            "u" => {
                let fields: Vec<&str> = rest.splitn(10, ' ').collect();
                if fields.len() != 10 {
                    return Err(malformed("status", &token));
                }
                report.entries.push(StatusEntry {
                    path: fields[9].to_string(),
                    orig_path: None,
                    staged: None,
                    unstaged: Some(ChangeKind::Modified),
                    conflicted: true,
                    untracked: false,
                });
            }
            "?" => report.entries.push(StatusEntry {
                path: rest.to_string(),
                orig_path: None,
                staged: None,
                unstaged: Some(ChangeKind::Added),
                conflicted: false,
                untracked: true,
            }),
            // Ignored files are never requested
            "!" => {}
            _ => return Err(malformed("status", &token)),
        }
    }
    Ok(report)
}

fn parse_branch_header(header: &str, branch: &mut BranchStatus) {
    let Some((key, value)) = header.split_once(' ') else {
        return;
    };
    match key {
        "branch.oid" => branch.oid = CommitId::parse(value).ok(),
        "branch.head" => {
            branch.head = (value != "(detached)").then(|| value.to_string());
        }
        "branch.upstream" => branch.upstream = Some(value.to_string()),
        "branch.ab" => {
            for part in value.split_whitespace() {
                if let Some(n) = part.strip_prefix('+') {
                    branch.ahead = n.parse().unwrap_or(0);
                } else if let Some(n) = part.strip_prefix('-') {
                    branch.behind = n.parse().unwrap_or(0);
                }
            }
        }
        _ => {}
    }
}

/// Records produced with [`LOG_FORMAT`]
pub fn parse_log(output: &[u8]) -> Result<Vec<Commit>, GitError> {
    let text = String::from_utf8_lossy(output);
    let mut commits = Vec::new();
    for record in text.split(RECORD_SEP) {
        let record = record.trim_start_matches('\n');
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.splitn(9, FIELD_SEP).collect();
        if fields.len() != 9 {
            return Err(malformed("log", record.lines().next().unwrap_or_default()));
        }
        let parents = fields[1]
            .split_whitespace()
            .map(CommitId::parse)
            .collect::<Result<Vec<_>, _>>()?;
        commits.push(Commit {
            id: CommitId::parse(fields[0])?,
            parents,
            author: Signature {
                name: fields[2].to_string(),
                email: fields[3].to_string(),
                time: timestamp(fields[4]),
            },
            committer: Signature {
                name: fields[5].to_string(),
                email: fields[6].to_string(),
                time: timestamp(fields[7]),
            },
            message: fields[8].trim_end_matches('\n').to_string(),
        });
    }
    Ok(commits)
}

/// One entry of `--name-status -z` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameStatus {
    pub kind: ChangeKind,
    pub path: String,
    pub old_path: Option<String>,
    /// Unmerged entry (`U`)
    pub unmerged: bool,
}

/// `git diff-* --name-status -z`
pub fn parse_name_status(output: &[u8]) -> Result<Vec<NameStatus>, GitError> {
    let mut entries = Vec::new();
    let mut tokens = nul_tokens(output);
    while let Some(status) = tokens.next() {
        let code = status.chars().next().unwrap_or(' ');
        let path = tokens
            .next()
            .ok_or_else(|| malformed("name-status", &status))?;
        let entry = match code {
            'R' | 'C' => {
                let new_path = tokens
                    .next()
                    .ok_or_else(|| malformed("name-status", &status))?;
                NameStatus {
                    kind: if code == 'R' {
                        ChangeKind::Renamed
                    } else {
                        ChangeKind::Added
                    },
                    path: new_path,
                    old_path: Some(path),
                    unmerged: false,
                }
            }
            'U' => NameStatus {
                kind: ChangeKind::Modified,
                path,
                old_path: None,
                unmerged: true,
            },
            other => NameStatus {
                kind: status_kind(other).ok_or_else(|| malformed("name-status", &status))?,
                path,
                old_path: None,
                unmerged: false,
            },
        };
        entries.push(entry);
    }
    Ok(entries)
}

#[derive(Default, Clone)]
struct BlameCommitInfo {
    author: String,
    time: DateTime<Utc>,
    summary: String,
}

fn is_object_id(token: &str) -> bool {
    (token.len() == 40 || token.len() == 64) && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// `git blame --porcelain`
pub fn parse_blame(output: &str) -> Result<Vec<BlameLine>, GitError> {
    let mut infos: HashMap<String, BlameCommitInfo> = HashMap::new();
    let mut current: Option<(String, u32, u32)> = None;
    let mut lines = Vec::new();

    for raw in output.split('\n') {
        if let Some(content) = raw.strip_prefix('\t') {
            let (sha, original_line, line) = current
                .take()
                .ok_or_else(|| malformed("blame", "content without header"))?;
            let info = infos.get(&sha).cloned().unwrap_or_default();
            lines.push(BlameLine {
                line,
                original_line,
                commit: CommitId::parse(&sha)?,
                author: info.author,
                time: info.time,
                summary: info.summary,
                content: content.to_string(),
            });
            continue;
        }

        let mut parts = raw.splitn(2, ' ');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();

        if is_object_id(key) {
            let mut numbers = value.split(' ').map(|n| n.parse::<u32>());
            let original = numbers.next().and_then(Result::ok);
            let fin = numbers.next().and_then(Result::ok);
            let (Some(original), Some(fin)) = (original, fin) else {
                return Err(malformed("blame", raw));
            };
            infos.entry(key.to_string()).or_default();
            current = Some((key.to_string(), original, fin));
            continue;
        }

        let Some((sha, _, _)) = current.as_ref() else {
            continue;
        };
        let Some(info) = infos.get_mut(sha) else {
            continue;
        };
        match key {
            "author" => info.author = value.to_string(),
            "author-time" => info.time = timestamp(value),
            "summary" => info.summary = value.to_string(),
            _ => {}
        }
    }
    Ok(lines)
}

/// `git ls-files -u -z`, grouped per path in first-seen order
pub fn parse_unmerged(output: &[u8]) -> Vec<ConflictedPath> {
    let mut order: Vec<String> = Vec::new();
    let mut by_path: HashMap<String, ConflictedPath> = HashMap::new();

    for token in nul_tokens(output) {
        let Some((meta, path)) = token.split_once('\t') else {
            continue;
        };
        let fields: Vec<&str> = meta.split(' ').collect();
        let [_, sha, stage] = fields[..] else {
            continue;
        };
        let entry = by_path.entry(path.to_string()).or_insert_with(|| {
            order.push(path.to_string());
            ConflictedPath {
                path: path.to_string(),
                ours: None,
                base: None,
                theirs: None,
            }
        });
        let handle = Some(BlobHandle(sha.to_string()));
        match stage {
            "1" => entry.base = handle,
            "2" => entry.ours = handle,
            "3" => entry.theirs = handle,
            _ => {}
        }
    }

    order
        .into_iter()
        .filter_map(|p| by_path.remove(&p))
        .collect()
}

/// `git ls-files -s -z`: path → blob id for stage 0 entries
pub fn parse_staged_blobs(output: &[u8]) -> HashMap<String, String> {
    nul_tokens(output)
        .filter_map(|token| {
            let (meta, path) = token.split_once('\t')?;
            let fields: Vec<&str> = meta.split(' ').collect();
            match fields[..] {
                [_, sha, "0"] => Some((path.to_string(), sha.to_string())),
                _ => None,
            }
        })
        .collect()
}

/// `git stash list` with [`STASH_FORMAT`]
pub fn parse_stash_list(output: &str) -> Vec<Ref> {
    output
        .lines()
        .filter_map(|line| {
            let (sha, selector) = line.split_once(FIELD_SEP)?;
            Some(Ref {
                name: selector.to_string(),
                short_name: selector.to_string(),
                target: CommitId::parse(sha).ok()?,
                kind: RefKind::Stash,
                is_head: false,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const A: &str = "1111111111111111111111111111111111111111";
    const B: &str = "2222222222222222222222222222222222222222";

    #[test]
    fn test_status_v2() {
        let raw = format!(
            "# branch.oid {A}\0# branch.head main\0# branch.upstream origin/main\0# branch.ab +2 -1\0\
             1 M. N... 100644 100644 100644 {A} {B} src/lib.rs\0\
             1 .M N... 100644 100644 100644 {A} {A} docs/read me.md\0\
             2 R. N... 100644 100644 100644 {A} {A} R100 new name.rs\0old.rs\0\
             u UU N... 100644 100644 100644 100644 {A} {B} {A} conflict.txt\0\
             ? untracked.txt\0"
        );
        let report = parse_status_v2(raw.as_bytes()).unwrap();

        assert_eq!(report.branch.head.as_deref(), Some("main"));
        assert_eq!(report.branch.oid.as_ref().map(CommitId::as_str), Some(A));
        assert_eq!(report.branch.upstream.as_deref(), Some("origin/main"));
        assert_eq!((report.branch.ahead, report.branch.behind), (2, 1));

        assert_eq!(report.entries.len(), 5);
        assert_eq!(report.entries[0].staged, Some(ChangeKind::Modified));
        assert_eq!(report.entries[0].unstaged, None);
        assert_eq!(report.entries[1].path, "docs/read me.md");
        assert_eq!(report.entries[1].unstaged, Some(ChangeKind::Modified));
        assert_eq!(report.entries[2].path, "new name.rs");
        assert_eq!(report.entries[2].orig_path.as_deref(), Some("old.rs"));
        assert_eq!(report.entries[2].staged, Some(ChangeKind::Renamed));
        assert!(report.entries[3].conflicted);
        assert!(report.entries[4].untracked);
        assert_eq!(report.conflicted_paths(), vec!["conflict.txt".to_string()]);
    }

    #[test]
    fn test_status_unborn_and_detached() {
        let raw = b"# branch.oid (initial)\0# branch.head (detached)\0";
        let report = parse_status_v2(raw).unwrap();
        assert!(report.branch.oid.is_none());
        assert!(report.branch.head.is_none());
        assert!(report.is_clean());
    }

    #[test]
    fn test_log_records() {
        let raw = format!(
            "{A}\x1f{B}\x1fAda\x1fada@example.com\x1f1700000000\x1fBob\x1fbob@example.com\x1f1700000100\x1fSubject line\n\nBody text\n\x1e\n\
             {B}\x1f\x1fAda\x1fada@example.com\x1f1690000000\x1fAda\x1fada@example.com\x1f1690000000\x1fRoot\n\x1e\n"
        );
        let commits = parse_log(raw.as_bytes()).unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].id.as_str(), A);
        assert_eq!(commits[0].parents.len(), 1);
        assert_eq!(commits[0].summary(), "Subject line");
        assert_eq!(commits[0].message, "Subject line\n\nBody text");
        assert_eq!(commits[0].committer.name, "Bob");
        assert_eq!(commits[0].author.time.timestamp(), 1_700_000_000);
        assert!(commits[1].parents.is_empty());
    }

    #[test]
    fn test_name_status() {
        let raw = b"M\0src/a.rs\0R087\0old.rs\0new.rs\0A\0added.rs\0D\0gone.rs\0U\0both.rs\0";
        let entries = parse_name_status(raw).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[1].kind, ChangeKind::Renamed);
        assert_eq!(entries[1].path, "new.rs");
        assert_eq!(entries[1].old_path.as_deref(), Some("old.rs"));
        assert_eq!(entries[3].kind, ChangeKind::Deleted);
        assert!(entries[4].unmerged);
    }

    #[test]
    fn test_blame_porcelain() {
        let raw = format!(
            "{A} 1 1 2\nauthor Ada\nauthor-mail <ada@example.com>\nauthor-time 1700000000\n\
             author-tz +0000\ncommitter Ada\ncommitter-mail <ada@example.com>\ncommitter-time 1700000000\n\
             committer-tz +0000\nsummary First\nboundary\nfilename f.txt\n\tline one\n\
             {A} 2 2\n\tline two\n\
             {B} 2 3 1\nauthor Bob\nauthor-time 1700000500\nsummary Second\nprevious {A} f.txt\nfilename f.txt\n\tline three\n"
        );
        let lines = parse_blame(&raw).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].author, "Ada");
        assert_eq!(lines[1].content, "line two");
        assert_eq!(lines[1].summary, "First");
        assert_eq!(lines[2].commit.as_str(), B);
        assert_eq!(lines[2].line, 3);
        assert_eq!(lines[2].original_line, 2);
        assert_eq!(lines[2].author, "Bob");
    }

    #[test]
    fn test_unmerged_grouping() {
        let raw = format!(
            "100644 {A} 1\tc.txt\0100644 {B} 2\tc.txt\0100644 {A} 3\tc.txt\0100644 {B} 2\tdeleted-theirs.txt\0"
        );
        let paths = parse_unmerged(raw.as_bytes());
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].path, "c.txt");
        assert_eq!(paths[0].base.as_ref().map(|b| b.0.as_str()), Some(A));
        assert_eq!(paths[0].ours.as_ref().map(|b| b.0.as_str()), Some(B));
        assert!(paths[1].theirs.is_none());
    }

    #[test]
    fn test_staged_blobs_skip_conflict_stages() {
        let raw = format!("100644 {A} 0\tok.txt\0100644 {B} 2\tconflict.txt\0");
        let blobs = parse_staged_blobs(raw.as_bytes());
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs["ok.txt"], A);
    }

    #[test]
    fn test_stash_list() {
        let raw = format!("{A}\x1fstash@{{0}}\n{B}\x1fstash@{{1}}\n");
        let stashes = parse_stash_list(&raw);
        assert_eq!(stashes.len(), 2);
        assert_eq!(stashes[1].name, "stash@{1}");
        assert_eq!(stashes[1].kind, RefKind::Stash);
    }
}
