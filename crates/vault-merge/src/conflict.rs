use vault_object::TreeEntry;

use crate::error::MergeResult;

/// A file both sides changed differently since the merge base.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    pub ours: TreeEntry,
    pub theirs: TreeEntry,
    /// The merge base's version, if the path existed there.
    pub parent: Option<TreeEntry>,
}

/// Picks the entry written at a conflicting path.
pub type Resolver<'r> = &'r dyn Fn(&Conflict) -> MergeResult<TreeEntry>;

/// Keep our version.
pub fn ours_wins(conflict: &Conflict) -> MergeResult<TreeEntry> {
    Ok(conflict.ours)
}

/// Take their version.
pub fn theirs_wins(conflict: &Conflict) -> MergeResult<TreeEntry> {
    Ok(conflict.theirs)
}
