//! Version-stamped item addresses.

use smallvec::SmallVec;

/// One child-slot offset per tree level, root first.
pub(crate) type Path = SmallVec<[usize; 10]>;

/// Stable address of one item inside a specific tree revision.
///
/// An index is only meaningful against the revision that produced it: every
/// structural mutation advances the owning rope's version counter, and all
/// index-consuming operations verify the stamp before descending. Using an
/// index issued before a mutation is a programming error and panics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Index {
    pub(crate) path: Path,
    pub(crate) version: u64,
}

impl Index {
    pub(crate) fn new(path: Path, version: u64) -> Self {
        Index { path, version }
    }

    /// The revision stamp this index was issued against.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Depth of the addressed leaf (number of levels in the path).
    #[inline]
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}
