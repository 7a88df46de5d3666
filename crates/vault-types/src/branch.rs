//! Branch name validation.
//!
//! Branch names travel over the wire and become file names under the
//! repository's `branches/` directory, so they follow git-style rules:
//!
//! - non-empty and at most [`MAX_BRANCH_NAME_LEN`] bytes
//! - no whitespace, control characters, `~ ^ : ? * [ \`
//! - no `..`, no leading or trailing `/` or `.`, no `//`
//! - no path component starting with `.` and no `.lock` suffix

use crate::error::TypeError;

/// Longest branch name accepted (fits the protocol's `u16` string prefix).
pub const MAX_BRANCH_NAME_LEN: usize = 255;

const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

fn invalid(name: &str, reason: impl Into<String>) -> TypeError {
    TypeError::InvalidBranchName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Validate a branch name, returning `Ok(())` if it is usable.
///
/// ```
/// use vault_types::validate_branch_name;
///
/// assert!(validate_branch_name("main").is_ok());
/// assert!(validate_branch_name("inbox/alice").is_ok());
/// assert!(validate_branch_name("").is_err());
/// assert!(validate_branch_name("a/../b").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(invalid(name, "must not be empty"));
    }
    if name.len() > MAX_BRANCH_NAME_LEN {
        return Err(invalid(
            name,
            format!("longer than {MAX_BRANCH_NAME_LEN} bytes"),
        ));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return Err(invalid(name, format!("contains forbidden character {ch:?}")));
    }
    if name.contains("..") {
        return Err(invalid(name, "must not contain '..'"));
    }
    if name.starts_with('/') || name.ends_with('/') || name.ends_with('.') {
        return Err(invalid(name, "must not start or end with '/' or end with '.'"));
    }
    if name.ends_with(".lock") {
        return Err(invalid(name, "must not end with '.lock'"));
    }
    for component in name.split('/') {
        if component.is_empty() {
            return Err(invalid(name, "must not contain '//'"));
        }
        if component.starts_with('.') {
            return Err(invalid(
                name,
                format!("component {component:?} must not start with '.'"),
            ));
        }
    }
    Ok(())
}
