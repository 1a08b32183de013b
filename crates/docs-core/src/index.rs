//! DocumentIndex: flat key → node map plus the tree algorithms.
//!
//! The tree is never modelled as linked nodes. Parent and child links are
//! keys into the map, so rename and delete cascades are prefix scans over
//! the key set.

use crate::node::{DocumentNode, DocumentRecord, NodeKind};
use crate::path_key::{self, NameError, PathKey};
use crate::store::TreeSnapshot;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("'{name}' already exists in {parent}")]
    DuplicateName { parent: PathKey, name: String },

    #[error("Node not found: {id}")]
    NodeNotFound { id: PathKey },

    #[error("Not a folder: {id}")]
    NotADirectory { id: PathKey },

    #[error("The root folder cannot be renamed or deleted")]
    RootImmutable,
}

impl From<NameError> for IndexError {
    fn from(e: NameError) -> Self {
        match e {
            NameError::Empty => IndexError::EmptyName,
            NameError::Invalid { name, reason } => IndexError::InvalidName { name, reason },
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// A structural invariant that does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("Root {0} is missing")]
    MissingRoot(PathKey),

    #[error("Root {0} has a parent")]
    RootHasParent(PathKey),

    #[error("{0} has no parent but is not the root")]
    Orphan(PathKey),

    #[error("{child} names missing parent {parent}")]
    MissingParent { child: PathKey, parent: PathKey },

    #[error("{child} is not listed among the children of {parent}")]
    NotListed { child: PathKey, parent: PathKey },

    #[error("{parent} lists {child}, which does not name it as parent")]
    StrayChild { parent: PathKey, child: PathKey },

    #[error("{parent} lists {child} more than once")]
    DuplicateChild { parent: PathKey, child: PathKey },

    #[error("File {0} has children")]
    FileWithChildren(PathKey),

    #[error("File {0} has no content id")]
    MissingContentId(PathKey),

    #[error("Folder {0} carries a content id")]
    FolderWithContentId(PathKey),

    #[error("{id} has invalid key segment '{segment}'")]
    InvalidSegment { id: PathKey, segment: String },

    #[error("{id} should be keyed {expected}")]
    BadDerivation { id: PathKey, expected: PathKey },

    #[error("{0} nodes are unreachable from the root")]
    Unreachable(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("Snapshot root {0} is not among its nodes")]
    MissingRoot(PathKey),

    #[error("Snapshot contains {0} more than once")]
    DuplicateId(PathKey),

    #[error("Snapshot is inconsistent: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// What a confirmed folder rename changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRename {
    pub old_id: PathKey,
    pub new_id: PathKey,
    /// Re-keyed nodes, the folder itself included.
    pub affected: usize,
}

/// Locally validated rename, ready to be sent to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePlan {
    pub id: PathKey,
    pub kind: NodeKind,
    pub content_id: Option<String>,
    pub new_name: String,
    /// Key after the rename; equal to `id` for files.
    pub new_id: PathKey,
    /// The node already carries `new_name`.
    pub unchanged: bool,
}

/// The client-held document tree of one piece of equipment.
#[derive(Debug, Clone)]
pub struct DocumentIndex {
    root: PathKey,
    nodes: HashMap<PathKey, DocumentNode>,
}

impl DocumentIndex {
    /// Index holding only an empty root folder.
    pub fn with_root(root_id: PathKey, name: impl Into<String>) -> Self {
        let root = DocumentNode::from_record(DocumentRecord::root(root_id.clone(), name));
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        Self { root: root_id, nodes }
    }

    /// Populate an index wholesale from a store snapshot.
    ///
    /// Cached child counts that disagree with the child lists are corrected;
    /// any other inconsistency rejects the snapshot.
    pub fn from_snapshot(snapshot: TreeSnapshot) -> std::result::Result<Self, SnapshotError> {
        let mut nodes = HashMap::with_capacity(snapshot.nodes.len());
        for record in snapshot.nodes {
            if record.children_count != record.children_ids.len() {
                tracing::warn!(
                    "Snapshot count for {} is {} but it lists {} children",
                    record.id,
                    record.children_count,
                    record.children_ids.len()
                );
            }
            let id = record.id.clone();
            if nodes.insert(id.clone(), DocumentNode::from_record(record)).is_some() {
                return Err(SnapshotError::DuplicateId(id));
            }
        }
        if !nodes.contains_key(&snapshot.root_id) {
            return Err(SnapshotError::MissingRoot(snapshot.root_id));
        }

        let index = Self {
            root: snapshot.root_id,
            nodes,
        };
        index.check_invariants()?;
        tracing::debug!("Loaded index with {} nodes", index.len());
        Ok(index)
    }

    /// Export every node, root first, in display order.
    pub fn to_snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            root_id: self.root.clone(),
            nodes: self
                .preorder(&self.root)
                .into_iter()
                .map(DocumentNode::to_record)
                .collect(),
        }
    }

    // ========== Reads ==========

    pub fn root_id(&self) -> &PathKey {
        &self.root
    }

    pub fn root(&self) -> &DocumentNode {
        // Every constructor guarantees the root entry
        &self.nodes[&self.root]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Never true: an index always holds its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &PathKey) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &PathKey) -> Option<&DocumentNode> {
        self.nodes.get(id)
    }

    /// Like [`get`](Self::get) but reports a missing key as an error.
    pub fn node(&self, id: &PathKey) -> Result<&DocumentNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| IndexError::NodeNotFound { id: id.clone() })
    }

    fn folder(&self, id: &PathKey) -> Result<&DocumentNode> {
        let node = self.node(id)?;
        if !node.is_directory() {
            return Err(IndexError::NotADirectory { id: id.clone() });
        }
        Ok(node)
    }

    /// Immediate children of `folder_id`, in stored order.
    pub fn children_of(&self, folder_id: &PathKey) -> Result<Vec<&DocumentNode>> {
        let node = self.node(folder_id)?;
        Ok(node
            .children_ids
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .collect())
    }

    /// Path from the root down to `id`, root first and `id` last.
    pub fn ancestor_chain(&self, id: &PathKey) -> Result<Vec<&DocumentNode>> {
        let mut chain = vec![self.node(id)?];
        let mut current = chain[0];
        while let Some(parent_id) = &current.parent_id {
            // Bounded by the tree depth; a cycle cannot pass check_invariants
            if chain.len() > self.nodes.len() {
                break;
            }
            current = self.node(parent_id)?;
            chain.push(current);
        }
        chain.reverse();
        Ok(chain)
    }

    /// All nodes beneath `id`, depth first in display order, excluding `id`.
    pub fn descendants_of(&self, id: &PathKey) -> Result<Vec<&DocumentNode>> {
        self.node(id)?;
        Ok(self.preorder(id).into_iter().skip(1).collect())
    }

    fn preorder(&self, start: &PathKey) -> Vec<&DocumentNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&DocumentNode> = self.nodes.get(start).into_iter().collect();
        while let Some(node) = stack.pop() {
            // A malformed snapshot may contain a cycle
            if out.len() > self.nodes.len() {
                break;
            }
            stack.extend(
                node.children_ids
                    .iter()
                    .rev()
                    .filter_map(|child| self.nodes.get(child)),
            );
            out.push(node);
        }
        out
    }

    // ========== Local preconditions ==========

    fn has_sibling_named(
        &self,
        parent: &DocumentNode,
        name: &str,
        except: Option<&PathKey>,
    ) -> bool {
        parent.children_ids.iter().any(|child| {
            Some(child) != except
                && self
                    .nodes
                    .get(child)
                    .is_some_and(|node| node.name == name)
        })
    }

    /// Validate a new folder; returns the key it will have.
    pub fn check_create_folder(&self, parent_id: &PathKey, name: &str) -> Result<PathKey> {
        let parent = self.folder(parent_id)?;
        path_key::validate_folder_name(name)?;
        let id = parent.id.child(name);
        if self.nodes.contains_key(&id) {
            return Err(IndexError::DuplicateName {
                parent: parent_id.clone(),
                name: name.to_string(),
            });
        }
        Ok(id)
    }

    /// Validate a rename of `id` to `new_name`.
    pub fn check_rename(&self, id: &PathKey, new_name: &str) -> Result<RenamePlan> {
        let node = self.node(id)?;
        let Some(parent_id) = &node.parent_id else {
            return Err(IndexError::RootImmutable);
        };
        let parent = self.node(parent_id)?;

        let new_id = match node.kind {
            NodeKind::Folder => {
                path_key::validate_folder_name(new_name)?;
                parent_id.child(new_name)
            }
            NodeKind::File => {
                path_key::validate_display_name(new_name)?;
                node.id.clone()
            }
        };
        let unchanged = node.name == new_name;

        if !unchanged {
            let taken = match node.kind {
                NodeKind::Folder => self.nodes.contains_key(&new_id),
                NodeKind::File => self.has_sibling_named(parent, new_name, Some(id)),
            };
            if taken {
                return Err(IndexError::DuplicateName {
                    parent: parent_id.clone(),
                    name: new_name.to_string(),
                });
            }
        }

        Ok(RenamePlan {
            id: id.clone(),
            kind: node.kind,
            content_id: node.content_id.clone(),
            new_name: new_name.to_string(),
            new_id,
            unchanged,
        })
    }

    /// Validate a delete selection: de-duplicated, present, root excluded.
    pub fn check_delete(&self, ids: &[PathKey]) -> Result<Vec<PathKey>> {
        let mut seen = HashSet::new();
        let mut selection = Vec::with_capacity(ids.len());
        for id in ids {
            if *id == self.root {
                return Err(IndexError::RootImmutable);
            }
            self.node(id)?;
            if seen.insert(id) {
                selection.push(id.clone());
            }
        }
        Ok(selection)
    }

    /// True if a sibling under `parent_id` already shows `name`.
    pub fn name_taken(&self, parent_id: &PathKey, name: &str) -> Result<bool> {
        let parent = self.node(parent_id)?;
        Ok(self.has_sibling_named(parent, name, None))
    }

    // ========== Mutations ==========

    /// Insert a new, empty folder under `parent_id`.
    pub fn insert_folder(
        &mut self,
        parent_id: &PathKey,
        name: &str,
        modified_at: Option<u64>,
    ) -> Result<PathKey> {
        let id = self.check_create_folder(parent_id, name)?;
        let node =
            DocumentNode::folder(id.clone(), name.to_string(), parent_id.clone(), modified_at);
        self.attach(node);
        Ok(id)
    }

    /// Insert a file keyed by its store-assigned content id.
    pub fn insert_file(
        &mut self,
        parent_id: &PathKey,
        name: &str,
        content_id: &str,
        modified_at: Option<u64>,
        size_bytes: Option<u64>,
    ) -> Result<PathKey> {
        self.folder(parent_id)?;
        path_key::validate_display_name(name)?;
        path_key::validate_folder_name(content_id)?;
        let node = DocumentNode::file(
            parent_id.clone(),
            name.to_string(),
            content_id.to_string(),
            modified_at,
            size_bytes,
        );
        if self.nodes.contains_key(&node.id) {
            return Err(IndexError::DuplicateName {
                parent: parent_id.clone(),
                name: content_id.to_string(),
            });
        }
        let id = node.id.clone();
        self.attach(node);
        Ok(id)
    }

    fn attach(&mut self, node: DocumentNode) {
        if let Some(parent) = node
            .parent_id
            .as_ref()
            .and_then(|parent_id| self.nodes.get_mut(parent_id))
        {
            parent.children_ids.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    /// Change a file's display name. Its key does not change.
    pub fn rename_file(&mut self, id: &PathKey, new_name: &str) -> Result<()> {
        let plan = self.check_rename(id, new_name)?;
        if plan.kind != NodeKind::File {
            return Err(IndexError::InvalidName {
                name: new_name.to_string(),
                reason: "target is a folder",
            });
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.name = plan.new_name;
        }
        Ok(())
    }

    /// Rename a folder and re-key its whole subtree.
    ///
    /// Every rewrite is computed from the current state before any key is
    /// removed, then old keys are dropped and new keys inserted.
    pub fn rename_folder(&mut self, id: &PathKey, new_name: &str) -> Result<FolderRename> {
        let plan = self.check_rename(id, new_name)?;
        if plan.kind != NodeKind::Folder {
            return Err(IndexError::NotADirectory { id: id.clone() });
        }
        let old = plan.id;
        let new = plan.new_id;
        if plan.unchanged {
            return Ok(FolderRename {
                old_id: old.clone(),
                new_id: new,
                affected: 0,
            });
        }

        let moves: Vec<(PathKey, PathKey)> = self
            .nodes
            .keys()
            .filter_map(|key| key.rebase(&old, &new).map(|rebased| (key.clone(), rebased)))
            .collect();

        let mut rewritten = Vec::with_capacity(moves.len());
        for (key, rebased) in &moves {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            let mut node = node.clone();
            node.id = rebased.clone();
            if *key == old {
                node.name = plan.new_name.clone();
            }
            if let Some(parent_id) = node.parent_id.as_ref().and_then(|p| p.rebase(&old, &new)) {
                node.parent_id = Some(parent_id);
            }
            for child in &mut node.children_ids {
                if let Some(rebased_child) = child.rebase(&old, &new) {
                    *child = rebased_child;
                }
            }
            rewritten.push(node);
        }

        for (key, _) in &moves {
            self.nodes.remove(key);
        }
        for node in rewritten {
            self.nodes.insert(node.id.clone(), node);
        }

        let parent_id = self.nodes.get(&new).and_then(|node| node.parent_id.clone());
        if let Some(parent) = parent_id.and_then(|parent_id| self.nodes.get_mut(&parent_id)) {
            if let Some(slot) = parent.children_ids.iter_mut().find(|child| **child == old) {
                *slot = new.clone();
            }
        }

        tracing::debug!("Re-keyed {} nodes: {} -> {}", moves.len(), old, new);
        Ok(FolderRename {
            old_id: old,
            new_id: new,
            affected: moves.len(),
        })
    }

    /// Remove `id` and, for folders, its whole subtree. The former parent
    /// loses exactly one child link.
    ///
    /// Returns the removed keys.
    pub fn remove_subtree(&mut self, id: &PathKey) -> Result<Vec<PathKey>> {
        if *id == self.root {
            return Err(IndexError::RootImmutable);
        }
        let node = self.node(id)?;
        let parent_id = node.parent_id.clone();

        let mut removed = vec![id.clone()];
        if node.is_directory() {
            removed.extend(self.nodes.keys().filter(|key| key.is_descendant_of(id)).cloned());
        }
        for key in &removed {
            self.nodes.remove(key);
        }

        if let Some(parent) = parent_id.and_then(|parent_id| self.nodes.get_mut(&parent_id)) {
            parent.children_ids.retain(|child| child != id);
        }

        tracing::debug!("Removed {} ({} nodes)", id, removed.len());
        Ok(removed)
    }

    // ========== Invariants ==========

    /// Verify every structural invariant of the tree.
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantViolation> {
        let root = self
            .nodes
            .get(&self.root)
            .ok_or_else(|| InvariantViolation::MissingRoot(self.root.clone()))?;
        if root.parent_id.is_some() {
            return Err(InvariantViolation::RootHasParent(self.root.clone()));
        }

        for (key, node) in &self.nodes {
            if *key != node.id {
                return Err(InvariantViolation::BadDerivation {
                    id: key.clone(),
                    expected: node.id.clone(),
                });
            }
            match (node.kind, &node.content_id) {
                (NodeKind::File, None) => {
                    return Err(InvariantViolation::MissingContentId(key.clone()));
                }
                (NodeKind::Folder, Some(_)) => {
                    return Err(InvariantViolation::FolderWithContentId(key.clone()));
                }
                _ => {}
            }
            if node.kind == NodeKind::File && !node.children_ids.is_empty() {
                return Err(InvariantViolation::FileWithChildren(key.clone()));
            }

            let mut listed = HashSet::with_capacity(node.children_ids.len());
            for child in &node.children_ids {
                if !listed.insert(child) {
                    return Err(InvariantViolation::DuplicateChild {
                        parent: key.clone(),
                        child: child.clone(),
                    });
                }
                let names_us = self
                    .nodes
                    .get(child)
                    .is_some_and(|c| c.parent_id.as_ref() == Some(key));
                if !names_us {
                    return Err(InvariantViolation::StrayChild {
                        parent: key.clone(),
                        child: child.clone(),
                    });
                }
            }

            if *key == self.root {
                continue;
            }
            let Some(parent_id) = &node.parent_id else {
                return Err(InvariantViolation::Orphan(key.clone()));
            };
            let Some(parent) = self.nodes.get(parent_id) else {
                return Err(InvariantViolation::MissingParent {
                    child: key.clone(),
                    parent: parent_id.clone(),
                });
            };
            if !parent.children_ids.contains(key) {
                return Err(InvariantViolation::NotListed {
                    child: key.clone(),
                    parent: parent_id.clone(),
                });
            }
            // A separator inside a segment would make the key look deeper than it is
            if let Some(segment) = node.segment() {
                if path_key::validate_folder_name(segment).is_err() {
                    return Err(InvariantViolation::InvalidSegment {
                        id: key.clone(),
                        segment: segment.to_string(),
                    });
                }
            }
            if let Some(expected) = node.expected_id() {
                if expected != *key {
                    return Err(InvariantViolation::BadDerivation {
                        id: key.clone(),
                        expected,
                    });
                }
            }
        }

        let reachable = self.preorder(&self.root).len();
        if reachable != self.nodes.len() {
            return Err(InvariantViolation::Unreachable(
                self.nodes.len().abs_diff(reachable),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn key(raw: &str) -> PathKey {
        PathKey::new(raw)
    }

    /// R
    /// ├── Docs
    /// │   ├── abc (manual.pdf)
    /// │   └── Sub
    /// │       └── def (wiring.pdf)
    /// └── ghi (readme.pdf)
    pub(crate) fn sample_index() -> DocumentIndex {
        let mut index = DocumentIndex::with_root(key("R"), "R");
        index.insert_folder(&key("R"), "Docs", None).unwrap();
        index
            .insert_file(&key("R\\Docs"), "manual.pdf", "abc", Some(1), Some(100))
            .unwrap();
        index.insert_folder(&key("R\\Docs"), "Sub", None).unwrap();
        index
            .insert_file(&key("R\\Docs\\Sub"), "wiring.pdf", "def", None, None)
            .unwrap();
        index.insert_file(&key("R"), "readme.pdf", "ghi", None, None).unwrap();
        index.check_invariants().unwrap();
        index
    }

    fn ids(nodes: Vec<&DocumentNode>) -> Vec<&str> {
        nodes.into_iter().map(|n| n.id().as_str()).collect()
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let index = sample_index();
        assert_eq!(ids(index.children_of(&key("R")).unwrap()), vec!["R\\Docs", "R\\ghi"]);
        assert_eq!(
            ids(index.children_of(&key("R\\Docs")).unwrap()),
            vec!["R\\Docs\\abc", "R\\Docs\\Sub"]
        );
        assert_eq!(index.root().children_count(), 2);
    }

    #[test]
    fn test_ancestor_chain_is_root_first() {
        let index = sample_index();
        let chain = index.ancestor_chain(&key("R\\Docs\\Sub")).unwrap();
        assert_eq!(ids(chain), vec!["R", "R\\Docs", "R\\Docs\\Sub"]);
        assert_eq!(ids(index.ancestor_chain(&key("R")).unwrap()), vec!["R"]);
    }

    #[test]
    fn test_reads_report_missing_node() {
        let index = sample_index();
        let missing = key("R\\Nope");
        assert_eq!(
            index.children_of(&missing).unwrap_err(),
            IndexError::NodeNotFound { id: missing.clone() }
        );
        assert!(index.ancestor_chain(&missing).is_err());
    }

    #[test]
    fn test_descendants_in_display_order() {
        let index = sample_index();
        assert_eq!(
            ids(index.descendants_of(&key("R")).unwrap()),
            vec!["R\\Docs", "R\\Docs\\abc", "R\\Docs\\Sub", "R\\Docs\\Sub\\def", "R\\ghi"]
        );
    }

    #[test]
    fn test_create_rejects_duplicate_and_bad_names() {
        let index = sample_index();
        assert_eq!(
            index.check_create_folder(&key("R"), "Docs"),
            Err(IndexError::DuplicateName {
                parent: key("R"),
                name: "Docs".into()
            })
        );
        assert_eq!(index.check_create_folder(&key("R"), ""), Err(IndexError::EmptyName));
        assert!(matches!(
            index.check_create_folder(&key("R"), "a\\b"),
            Err(IndexError::InvalidName { .. })
        ));
        assert_eq!(
            index.check_create_folder(&key("R\\ghi"), "x"),
            Err(IndexError::NotADirectory { id: key("R\\ghi") })
        );
    }

    #[test]
    fn test_folder_rename_rekeys_subtree() {
        let mut index = sample_index();
        let result = index.rename_folder(&key("R\\Docs"), "Archive").unwrap();
        assert_eq!(result.affected, 4);

        assert!(!index.contains(&key("R\\Docs")));
        assert!(!index.contains(&key("R\\Docs\\abc")));
        let archive = index.node(&key("R\\Archive")).unwrap();
        assert_eq!(archive.name(), "Archive");
        assert_eq!(
            archive.children_ids(),
            &[key("R\\Archive\\abc"), key("R\\Archive\\Sub")]
        );
        let deep = index.node(&key("R\\Archive\\Sub\\def")).unwrap();
        assert_eq!(deep.parent_id(), Some(&key("R\\Archive\\Sub")));
        assert_eq!(deep.name(), "wiring.pdf");

        // Position among siblings is kept
        assert_eq!(index.root().children_ids(), &[key("R\\Archive"), key("R\\ghi")]);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_folder_rename_leaves_lookalike_keys_alone() {
        let mut index = DocumentIndex::with_root(key("R"), "R");
        index.insert_folder(&key("R"), "Docs", None).unwrap();
        index.insert_folder(&key("R"), "Docs2", None).unwrap();
        index.insert_file(&key("R\\Docs2"), "a.pdf", "x", None, None).unwrap();

        index.rename_folder(&key("R\\Docs"), "Old").unwrap();

        assert!(index.contains(&key("R\\Docs2")));
        assert!(index.contains(&key("R\\Docs2\\x")));
        assert!(index.contains(&key("R\\Old")));
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_file_rename_keeps_key() {
        let mut index = sample_index();
        index.rename_file(&key("R\\Docs\\abc"), "Manual v2.pdf").unwrap();
        let node = index.node(&key("R\\Docs\\abc")).unwrap();
        assert_eq!(node.name(), "Manual v2.pdf");
        assert_eq!(node.content_id(), Some("abc"));
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_rename_checks_siblings() {
        let mut index = sample_index();
        index.insert_file(&key("R\\Docs"), "other.pdf", "zzz", None, None).unwrap();
        assert!(matches!(
            index.check_rename(&key("R\\Docs\\abc"), "other.pdf"),
            Err(IndexError::DuplicateName { .. })
        ));
        // A folder named after a sibling file's content id would take its key
        assert_eq!(
            index.check_rename(&key("R\\Docs"), "ghi"),
            Err(IndexError::DuplicateName {
                parent: key("R"),
                name: "ghi".into()
            })
        );
        assert_eq!(index.check_rename(&key("R"), "X"), Err(IndexError::RootImmutable));
        assert!(index.check_rename(&key("R\\Docs"), "Docs").unwrap().unchanged);
    }

    #[test]
    fn test_folder_may_share_a_file_display_name() {
        let mut index = sample_index();
        let plan = index.check_rename(&key("R\\Docs"), "readme.pdf").unwrap();
        assert_eq!(plan.new_id, key("R\\readme.pdf"));
        assert!(!plan.unchanged);

        index.rename_folder(&key("R\\Docs"), "readme.pdf").unwrap();
        assert!(index.contains(&key("R\\readme.pdf\\abc")));
        assert_eq!(index.node(&key("R\\ghi")).unwrap().name(), "readme.pdf");
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_folder_cascades_and_counts_one() {
        let mut index = sample_index();
        let before = index.root().children_count();
        let removed = index.remove_subtree(&key("R\\Docs")).unwrap();
        assert_eq!(removed.len(), 4);
        assert_eq!(index.root().children_count(), before - 1);
        assert_eq!(index.len(), 2);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_file_leaves_lookalike_prefix() {
        let mut index = DocumentIndex::with_root(key("R"), "R");
        index.insert_folder(&key("R"), "ab", None).unwrap();
        index.insert_folder(&key("R"), "abc", None).unwrap();
        index.insert_file(&key("R\\abc"), "x.pdf", "1", None, None).unwrap();

        index.remove_subtree(&key("R\\ab")).unwrap();

        assert!(index.contains(&key("R\\abc")));
        assert!(index.contains(&key("R\\abc\\1")));
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_check_delete_dedupes_and_guards_root() {
        let index = sample_index();
        let selection = index
            .check_delete(&[key("R\\ghi"), key("R\\Docs"), key("R\\ghi")])
            .unwrap();
        assert_eq!(selection, vec![key("R\\ghi"), key("R\\Docs")]);
        assert_eq!(index.check_delete(&[key("R")]), Err(IndexError::RootImmutable));
        assert!(index.check_delete(&[key("R\\zzz")]).is_err());
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_order() {
        let index = sample_index();
        let snapshot = index.to_snapshot();
        assert_eq!(snapshot.nodes[0].id, key("R"));
        let loaded = DocumentIndex::from_snapshot(snapshot).unwrap();
        assert_eq!(
            ids(loaded.descendants_of(&key("R")).unwrap()),
            ids(index.descendants_of(&key("R")).unwrap())
        );
    }

    #[test]
    fn test_snapshot_with_stray_child_rejected() {
        let mut snapshot = sample_index().to_snapshot();
        snapshot.nodes[0].children_ids.push(key("R\\ghost"));
        assert!(matches!(
            DocumentIndex::from_snapshot(snapshot),
            Err(SnapshotError::Invariant(InvariantViolation::StrayChild { .. }))
        ));
    }

    #[test]
    fn test_snapshot_with_bad_key_rejected() {
        let mut snapshot = sample_index().to_snapshot();
        // A file keyed by its name instead of its content id
        let file = snapshot
            .nodes
            .iter_mut()
            .find(|r| r.id == key("R\\ghi"))
            .unwrap();
        file.content_id = Some("other".into());
        assert!(matches!(
            DocumentIndex::from_snapshot(snapshot),
            Err(SnapshotError::Invariant(InvariantViolation::BadDerivation { .. }))
        ));
    }

    #[test]
    fn test_snapshot_file_without_content_id_rejected() {
        let mut snapshot = sample_index().to_snapshot();
        let file = snapshot
            .nodes
            .iter_mut()
            .find(|r| r.id == key("R\\ghi"))
            .unwrap();
        file.content_id = None;
        assert_eq!(
            DocumentIndex::from_snapshot(snapshot).unwrap_err(),
            SnapshotError::Invariant(InvariantViolation::MissingContentId(key("R\\ghi")))
        );
    }

    #[test]
    fn test_snapshot_folder_with_content_id_rejected() {
        let mut snapshot = sample_index().to_snapshot();
        let folder = snapshot
            .nodes
            .iter_mut()
            .find(|r| r.id == key("R\\Docs"))
            .unwrap();
        folder.content_id = Some("xyz".into());
        assert_eq!(
            DocumentIndex::from_snapshot(snapshot).unwrap_err(),
            SnapshotError::Invariant(InvariantViolation::FolderWithContentId(key("R\\Docs")))
        );
    }

    #[test]
    fn test_snapshot_segment_with_separator_rejected() {
        // File R\a\b sits directly under R, next to an unrelated folder R\a
        let mut root = DocumentRecord::root(key("R"), "R");
        root.children_ids = vec![key("R\\a"), key("R\\a\\b")];
        root.children_count = 2;
        let mut folder = DocumentRecord::root(key("R\\a"), "a");
        folder.parent_id = Some(key("R"));
        let mut file = DocumentRecord::root(key("R\\a\\b"), "b.pdf");
        file.is_directory = false;
        file.parent_id = Some(key("R"));
        file.content_id = Some("a\\b".into());

        let snapshot = TreeSnapshot {
            root_id: key("R"),
            nodes: vec![root, folder, file],
        };
        assert!(matches!(
            DocumentIndex::from_snapshot(snapshot),
            Err(SnapshotError::Invariant(InvariantViolation::InvalidSegment { .. }))
        ));
    }

    #[test]
    fn test_snapshot_count_mismatch_is_corrected() {
        let mut snapshot = sample_index().to_snapshot();
        snapshot.nodes[0].children_count = 7;
        let index = DocumentIndex::from_snapshot(snapshot).unwrap();
        assert_eq!(index.root().children_count(), 2);
    }

    #[test]
    fn test_snapshot_missing_root_rejected() {
        let mut snapshot = sample_index().to_snapshot();
        snapshot.root_id = key("Q");
        assert_eq!(
            DocumentIndex::from_snapshot(snapshot).unwrap_err(),
            SnapshotError::MissingRoot(key("Q"))
        );
    }
}
