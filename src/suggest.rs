//! Commit message suggestions
//!
//! The core does not generate text itself. It renders the staged changes as a
//! unified diff and hands them to a [`SuggestionProvider`] supplied by the
//! caller (typically backed by a language model). No retries happen here.

use async_trait::async_trait;

use crate::diff::FileDiff;
use crate::diff::patch;
use crate::error::Result;

/// Turns diff text into a proposed commit message
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    async fn suggest(&self, diff_text: &str) -> Result<String>;
}

/// Diff text handed to providers
pub fn suggestion_input(files: &[FileDiff]) -> String {
    patch::render_files(files)
}

/// Offline provider that names the touched files
#[derive(Debug, Clone, Default)]
pub struct FileListSuggester {
    /// More files than this are summarized as a count
    pub max_listed: usize,
}

impl FileListSuggester {
    pub fn new(max_listed: usize) -> Self {
        Self { max_listed }
    }
}

#[async_trait]
impl SuggestionProvider for FileListSuggester {
    async fn suggest(&self, diff_text: &str) -> Result<String> {
        let paths: Vec<&str> = diff_text
            .lines()
            .filter_map(|l| l.strip_prefix("diff --git a/"))
            .filter_map(|l| l.split(" b/").last())
            .collect();

        Ok(match paths.as_slice() {
            [] => "Update files".to_string(),
            [only] => format!("Update {only}"),
            many if many.len() <= self.max_listed.max(1) => format!("Update {}", many.join(", ")),
            many => format!("Update {} files", many.len()),
        })
    }
}
