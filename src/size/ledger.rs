use std::fs::Metadata;

use dashmap::DashMap;

/// Identity of a file on disk: (device, inode).
pub type FileId = (u64, u64);

/// The (device, inode) pair of a file, when the platform exposes one.
#[cfg(unix)]
pub fn file_id(metadata: &Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    let (dev, ino) = (metadata.dev(), metadata.ino());
    (ino != 0).then_some((dev, ino))
}

#[cfg(not(unix))]
pub fn file_id(_metadata: &Metadata) -> Option<FileId> {
    None
}

/// Run-wide record of which distribution owns each file identity.
///
/// Several walks may claim the same identity concurrently (hardlinks shared between
/// distributions). The lowest rank always wins, so ownership does not depend on which walk
/// got there first.
#[derive(Debug, Default)]
pub struct DedupLedger {
    owners: DashMap<FileId, usize>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, id: FileId, rank: usize) {
        self.owners
            .entry(id)
            .and_modify(|owner| *owner = (*owner).min(rank))
            .or_insert(rank);
    }

    pub fn owner(&self, id: &FileId) -> Option<usize> {
        self.owners.get(id).map(|owner| *owner)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
