//! Path walking

use std::collections::VecDeque;

use tracing::trace;

use crate::archive::Archive;
use crate::error::SquashfsError;
use crate::inode::{InodeId, InodeView};
use crate::metablock::InodeRef;

/// Resolve `/`-separated paths to inode references, following symlinks.
///
/// Empty segments and `"."` are no-ops, `".."` pops one component but never
/// past the root. Each symlink followed burns one unit of the depth budget;
/// exhausting it fails with `SymlinkLoop`.
pub(crate) struct PathResolver<'a> {
    archive: &'a Archive,
    /// Inode references from the root down to the current directory
    stack: Vec<InodeRef>,
    symlink_budget: usize,
}

impl<'a> PathResolver<'a> {
    pub(crate) fn new(archive: &'a Archive) -> Self {
        Self {
            archive,
            stack: vec![InodeRef(archive.superblock().root_inode)],
            symlink_budget: archive.config().max_symlink_depth,
        }
    }

    pub(crate) fn resolve(&mut self, path: &str) -> Result<InodeRef, SquashfsError> {
        let mut segments: VecDeque<Vec<u8>> =
            path.split('/').map(|s| s.as_bytes().to_vec()).collect();

        while let Some(segment) = segments.pop_front() {
            if segment.is_empty() || segment == b"." {
                continue;
            }
            if segment == b".." {
                if self.stack.len() > 1 {
                    self.stack.pop();
                }
                continue;
            }

            let parent = InodeView::load(self.archive, *self.stack.last().expect("root stays"))?;
            let mut dir = parent.directory()?;
            dir.lookup(&segment)?;

            if dir.inode_type() == InodeId::BasicSymlink {
                if self.symlink_budget == 0 {
                    return Err(SquashfsError::SymlinkLoop);
                }
                self.symlink_budget -= 1;

                let link = dir.load_inode()?;
                let target = link.symlink_target().ok_or(SquashfsError::Internal)?;
                trace!(target = %String::from_utf8_lossy(target), "following symlink");

                // relative targets resolve against the symlink's parent,
                // which is still the top of the stack
                if target.first() == Some(&b'/') {
                    self.stack.truncate(1);
                }
                for part in target.split(|&b| b == b'/').rev() {
                    segments.push_front(part.to_vec());
                }
            } else {
                self.stack.push(dir.inode_ref());
            }
        }

        Ok(*self.stack.last().expect("root stays"))
    }
}
