//! DocumentStore trait: the remote store the index mirrors.
//!
//! Implementations:
//! - `InMemoryStore` - authoritative in-memory tree with failure injection, for testing
//! - `JsonFileStore` (in docs-cli) - one JSON snapshot per equipment on local disk

use crate::events::now_millis;
use crate::index::DocumentIndex;
use crate::node::{DocumentRecord, NodeKind};
use crate::path_key::PathKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store request timed out: {0}")]
    Timeout(String),

    #[error("Unexpected store response: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Full tree of one piece of equipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSnapshot {
    pub root_id: PathKey,
    pub nodes: Vec<DocumentRecord>,
}

/// Rename as sent to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    pub old_id: PathKey,
    /// Set for files only.
    pub content_id: Option<String>,
    pub new_name: String,
    pub kind: NodeKind,
}

/// File content submitted for upload.
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A file the store accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub name: String,
    pub content_id: String,
    #[serde(default)]
    pub modified_at: Option<u64>,
}

/// Remote document store of equipment folders and files.
///
/// Boolean results report whether the store applied the change; `Err` means
/// the store could not be reached or answered nonsense.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the whole tree of `equipment_id`.
    async fn fetch_tree(&self, equipment_id: &str) -> Result<TreeSnapshot>;

    /// Create the folder keyed `folder_id`.
    async fn create_folder(&self, equipment_id: &str, folder_id: &PathKey) -> Result<bool>;

    /// Rename a file or folder.
    async fn rename_node(&self, equipment_id: &str, request: &RenameRequest) -> Result<bool>;

    /// Delete nodes; returns the subset actually removed.
    async fn delete_nodes(&self, equipment_id: &str, ids: &[PathKey]) -> Result<Vec<PathKey>>;

    /// Store files under `parent_id`; returns one entry per accepted file.
    async fn upload_files(
        &self,
        equipment_id: &str,
        parent_id: &PathKey,
        files: Vec<FileBlob>,
    ) -> Result<Vec<StoredFile>>;
}

// Share one store between coordinators in tests
#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    async fn fetch_tree(&self, equipment_id: &str) -> Result<TreeSnapshot> {
        (**self).fetch_tree(equipment_id).await
    }

    async fn create_folder(&self, equipment_id: &str, folder_id: &PathKey) -> Result<bool> {
        (**self).create_folder(equipment_id, folder_id).await
    }

    async fn rename_node(&self, equipment_id: &str, request: &RenameRequest) -> Result<bool> {
        (**self).rename_node(equipment_id, request).await
    }

    async fn delete_nodes(&self, equipment_id: &str, ids: &[PathKey]) -> Result<Vec<PathKey>> {
        (**self).delete_nodes(equipment_id, ids).await
    }

    async fn upload_files(
        &self,
        equipment_id: &str,
        parent_id: &PathKey,
        files: Vec<FileBlob>,
    ) -> Result<Vec<StoredFile>> {
        (**self).upload_files(equipment_id, parent_id, files).await
    }
}

/// Store operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FetchTree,
    CreateFolder,
    RenameNode,
    DeleteNodes,
    UploadFiles,
}

/// In-memory store for testing.
///
/// Keeps an authoritative tree per equipment and applies mutations to it the
/// way a real store would. Failures can be injected per operation.
#[derive(Default)]
pub struct InMemoryStore {
    trees: RwLock<HashMap<String, DocumentIndex>>,
    offline: AtomicBool,
    refuse_next: RwLock<HashSet<StoreOp>>,
    undeletable: RwLock<HashSet<PathKey>>,
    refused_uploads: RwLock<HashSet<String>>,
    content_ids: RwLock<VecDeque<String>>,
    calls: RwLock<HashMap<StoreOp, usize>>,
    total_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or replace) the tree of `equipment_id`.
    pub fn insert_tree(&self, equipment_id: &str, index: DocumentIndex) {
        self.trees
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(equipment_id.to_string(), index);
    }

    /// Current server-side tree, if any.
    pub fn tree(&self, equipment_id: &str) -> Option<DocumentIndex> {
        self.trees
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(equipment_id)
            .cloned()
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Answer the next call of `op` negatively: `false` for create and
    /// rename, nothing confirmed for delete and upload.
    pub fn refuse_next(&self, op: StoreOp) {
        self.refuse_next
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op);
    }

    /// Never confirm deletion of `id`.
    pub fn protect(&self, id: PathKey) {
        self.undeletable
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }

    /// Reject uploads named `name`.
    pub fn refuse_upload(&self, name: &str) {
        self.refused_uploads
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
    }

    /// Content ids handed out to the next uploads, before random ones.
    pub fn queue_content_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_ids
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .extend(ids.into_iter().map(Into::into));
    }

    /// Number of calls made to `op`.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Number of calls made to any operation.
    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Count the call, then report whether it should be refused.
    fn begin(&self, op: StoreOp) -> Result<bool> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        *self
            .calls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(op)
            .or_insert(0) += 1;

        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable(format!("{:?} while offline", op)));
        }
        Ok(self
            .refuse_next
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&op))
    }

    fn next_content_id(&self) -> String {
        self.content_ids
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
    }

    fn with_tree<T>(
        &self,
        equipment_id: &str,
        f: impl FnOnce(&mut DocumentIndex) -> T,
    ) -> Result<T> {
        let mut trees = self.trees.write().unwrap_or_else(|e| e.into_inner());
        let tree = trees
            .get_mut(equipment_id)
            .ok_or_else(|| StoreError::Protocol(format!("Unknown equipment: {}", equipment_id)))?;
        Ok(f(tree))
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn fetch_tree(&self, equipment_id: &str) -> Result<TreeSnapshot> {
        if self.begin(StoreOp::FetchTree)? {
            return Err(StoreError::Unavailable("fetch refused".into()));
        }
        self.with_tree(equipment_id, |tree| tree.to_snapshot())
    }

    async fn create_folder(&self, equipment_id: &str, folder_id: &PathKey) -> Result<bool> {
        if self.begin(StoreOp::CreateFolder)? {
            return Ok(false);
        }
        self.with_tree(equipment_id, |tree| {
            let Some(parent) = parent_of(tree, folder_id) else {
                return false;
            };
            tree.insert_folder(&parent, folder_id.last_segment(), Some(now_millis()))
                .is_ok()
        })
    }

    async fn rename_node(&self, equipment_id: &str, request: &RenameRequest) -> Result<bool> {
        if self.begin(StoreOp::RenameNode)? {
            return Ok(false);
        }
        self.with_tree(equipment_id, |tree| match request.kind {
            NodeKind::Folder => tree.rename_folder(&request.old_id, &request.new_name).is_ok(),
            NodeKind::File => tree.rename_file(&request.old_id, &request.new_name).is_ok(),
        })
    }

    async fn delete_nodes(&self, equipment_id: &str, ids: &[PathKey]) -> Result<Vec<PathKey>> {
        if self.begin(StoreOp::DeleteNodes)? {
            return Ok(Vec::new());
        }
        let undeletable = self
            .undeletable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        self.with_tree(equipment_id, |tree| {
            let mut deleted = Vec::new();
            for id in ids {
                // Protected nodes also shield their ancestors
                let shielded = undeletable.iter().any(|p| p.is_self_or_descendant_of(id));
                if shielded {
                    continue;
                }
                if !tree.contains(id) {
                    // Already gone with an ancestor deleted earlier in this batch
                    if deleted.iter().any(|d| id.is_descendant_of(d)) {
                        deleted.push(id.clone());
                    }
                    continue;
                }
                if tree.remove_subtree(id).is_ok() {
                    deleted.push(id.clone());
                }
            }
            deleted
        })
    }

    async fn upload_files(
        &self,
        equipment_id: &str,
        parent_id: &PathKey,
        files: Vec<FileBlob>,
    ) -> Result<Vec<StoredFile>> {
        if self.begin(StoreOp::UploadFiles)? {
            return Ok(Vec::new());
        }
        let refused = self
            .refused_uploads
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut stored = Vec::new();
        for file in files {
            if refused.contains(&file.name) {
                continue;
            }
            let content_id = self.next_content_id();
            let modified_at = now_millis();
            let size = file.bytes.len() as u64;
            let inserted = self.with_tree(equipment_id, |tree| {
                tree.insert_file(parent_id, &file.name, &content_id, Some(modified_at), Some(size))
                    .is_ok()
            })?;
            if inserted {
                stored.push(StoredFile {
                    name: file.name,
                    content_id,
                    modified_at: Some(modified_at),
                });
            }
        }
        Ok(stored)
    }
}

/// Parent of `folder_id`, if present in `tree`.
fn parent_of(tree: &DocumentIndex, folder_id: &PathKey) -> Option<PathKey> {
    folder_id.parent().filter(|parent| tree.contains(parent))
}
