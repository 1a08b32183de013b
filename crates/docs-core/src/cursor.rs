//! Current folder and breadcrumb trail of a browsing view.

use crate::events::IndexEvent;
use crate::index::{DocumentIndex, IndexError, Result};
use crate::node::DocumentNode;
use crate::path_key::PathKey;

/// Order of a folder listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingOrder {
    /// As stored in the parent's child list.
    #[default]
    Stored,
    /// Folders before files, each by case-insensitive name.
    FoldersFirst,
}

/// Where a view is in the tree.
///
/// The cursor only holds keys; nodes are always read from the index passed
/// in, so a stale cursor can never hand out stale nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationCursor {
    /// Root first, current folder last. Never empty.
    trail: Vec<PathKey>,
}

impl NavigationCursor {
    /// Cursor at the root of `index`.
    pub fn new(index: &DocumentIndex) -> Self {
        Self {
            trail: vec![index.root_id().clone()],
        }
    }

    pub fn current(&self) -> &PathKey {
        // trail always holds at least the root
        &self.trail[self.trail.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.trail.len() - 1
    }

    pub fn enter(&mut self, index: &DocumentIndex, folder_id: &PathKey) -> Result<()> {
        let node = index.node(folder_id)?;
        if !node.is_directory() {
            return Err(IndexError::NotADirectory {
                id: folder_id.clone(),
            });
        }
        self.trail = index
            .ancestor_chain(folder_id)?
            .into_iter()
            .map(|n| n.id().clone())
            .collect();
        Ok(())
    }

    /// Move to the parent folder. Returns false at the root.
    pub fn up(&mut self) -> bool {
        if self.trail.len() > 1 {
            self.trail.pop();
            true
        } else {
            false
        }
    }

    pub fn breadcrumbs<'a>(&self, index: &'a DocumentIndex) -> Result<Vec<&'a DocumentNode>> {
        index.ancestor_chain(self.current())
    }

    pub fn listing<'a>(
        &self,
        index: &'a DocumentIndex,
        order: ListingOrder,
    ) -> Result<Vec<&'a DocumentNode>> {
        let mut children = index.children_of(self.current())?;
        if order == ListingOrder::FoldersFirst {
            children.sort_by_cached_key(|node| (!node.is_directory(), node.name().to_lowercase()));
        }
        Ok(children)
    }

    /// Keep the cursor valid after `event` was applied to `index`.
    pub fn follow(&mut self, index: &DocumentIndex, event: &IndexEvent) {
        match event {
            IndexEvent::Loaded { .. } | IndexEvent::Cleared { .. } => {
                self.reset(index);
                return;
            }
            IndexEvent::Renamed { old_id, new_id, .. } if old_id != new_id => {
                for key in &mut self.trail {
                    if let Some(rebased) = key.rebase(old_id, new_id) {
                        *key = rebased;
                    }
                }
            }
            IndexEvent::Deleted { .. } => {
                let surviving = self
                    .trail
                    .iter()
                    .position(|key| !index.contains(key))
                    .unwrap_or(self.trail.len());
                self.trail.truncate(surviving);
            }
            _ => {}
        }

        if self.trail.is_empty() || !index.contains(self.current()) {
            tracing::debug!("Cursor lost its folder, returning to root");
            self.reset(index);
        }
    }

    fn reset(&mut self, index: &DocumentIndex) {
        self.trail = vec![index.root_id().clone()];
    }
}
