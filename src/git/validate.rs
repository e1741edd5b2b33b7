//! Argument checks performed before anything reaches git
//!
//! Every user-supplied name ends up on a command line. Rejecting leading
//! dashes keeps a value from being read as an option.

use crate::error::GitError;

fn invalid(what: &str, value: &str, reason: &str) -> GitError {
    GitError::InvalidArgument(format!("{what} '{value}': {reason}"))
}

/// Branch and tag names, following `git check-ref-format` rules
pub fn ref_name(name: &str) -> Result<(), GitError> {
    const FORBIDDEN: &[char] = &[' ', '~', '^', ':', '?', '*', '[', '\\'];

    if name.is_empty() {
        return Err(invalid("ref name", name, "empty"));
    }
    if name.starts_with('-') {
        return Err(invalid("ref name", name, "starts with '-'"));
    }
    if name == "@" || name == "HEAD" {
        return Err(invalid("ref name", name, "reserved"));
    }
    if name.contains("..") || name.contains("@{") || name.contains("//") {
        return Err(invalid("ref name", name, "contains a forbidden sequence"));
    }
    if name.chars().any(|c| c.is_control() || FORBIDDEN.contains(&c)) {
        return Err(invalid("ref name", name, "contains a forbidden character"));
    }
    if name.starts_with('/') || name.ends_with('/') || name.ends_with('.') {
        return Err(invalid("ref name", name, "bad leading or trailing character"));
    }
    for component in name.split('/') {
        if component.starts_with('.') || component.ends_with(".lock") {
            return Err(invalid("ref name", name, "bad path component"));
        }
    }
    Ok(())
}

/// Revision expressions (`main`, `HEAD~2`, hex ids)
pub fn revision(rev: &str) -> Result<(), GitError> {
    if rev.is_empty() {
        return Err(invalid("revision", rev, "empty"));
    }
    if rev.starts_with('-') {
        return Err(invalid("revision", rev, "starts with '-'"));
    }
    if rev.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(invalid("revision", rev, "contains whitespace"));
    }
    Ok(())
}

/// Repository-relative paths
pub fn path(path: &str) -> Result<(), GitError> {
    if path.is_empty() {
        return Err(invalid("path", path, "empty"));
    }
    if path.starts_with('/') || path.contains('\0') {
        return Err(invalid("path", path, "must be relative"));
    }
    if path.split('/').any(|c| c == "..") {
        return Err(invalid("path", path, "escapes the repository"));
    }
    Ok(())
}

pub fn paths<S: AsRef<str>>(paths: &[S]) -> Result<(), GitError> {
    if paths.is_empty() {
        return Err(GitError::InvalidArgument("no paths given".to_string()));
    }
    paths.iter().try_for_each(|p| path(p.as_ref()))
}

/// Remote names (`origin`)
pub fn remote(name: &str) -> Result<(), GitError> {
    if name.is_empty() || name.starts_with('-') {
        return Err(invalid("remote", name, "must be a non-empty name"));
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == ':')
    {
        return Err(invalid("remote", name, "contains a forbidden character"));
    }
    Ok(())
}
