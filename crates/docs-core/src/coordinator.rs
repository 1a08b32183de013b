//! SyncCoordinator: sequences intents against the store and applies
//! confirmed results to the index.
//!
//! Every mutating intent follows the same shape: validate locally (no store
//! call on failure), call the store, and only then mutate the index in one
//! step. A refused or failed call leaves the index exactly as it was.

use crate::events::{now_millis, EventBus, IndexEvent};
use crate::index::{DocumentIndex, IndexError, SnapshotError};
use crate::node::{DocumentNode, NodeKind};
use crate::path_key::PathKey;
use crate::store::{DocumentStore, RenameRequest, StoreError};
use crate::upload::{self, ExcludedCandidate, UploadCandidate, UploadPolicy};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Invalid tree snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Store refused to create folder {id}")]
    CreateRejected { id: PathKey },

    #[error("Store refused to rename {id}")]
    RenameRejected { id: PathKey },

    #[error("Store request failed: {0}")]
    Transport(#[from] StoreError),

    #[error("No equipment selected")]
    NoEquipmentSelected,
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// How much of an intent took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Everything requested was applied.
    Complete,
    /// Some parts were applied; the report lists the rest.
    Partial,
    /// Nothing was applied; the index is unchanged.
    Rejected,
}

/// Requested deletion the store did not confirm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Deletion of {id} was not confirmed")]
pub struct DeleteNotConfirmed {
    pub id: PathKey,
}

/// Upload where only some files were accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{accepted} of {submitted} files uploaded")]
pub struct UploadPartial {
    pub accepted: usize,
    pub submitted: usize,
}

/// Result of a confirmed rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOutcome {
    pub old_id: PathKey,
    pub new_id: PathKey,
    pub affected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Requested ids after de-duplication, in request order.
    pub requested: Vec<PathKey>,
    /// Requested ids now gone from the index.
    pub deleted: Vec<PathKey>,
    pub not_confirmed: Vec<DeleteNotConfirmed>,
    /// Nodes removed including cascaded descendants.
    pub removed_nodes: usize,
}

impl DeleteReport {
    pub fn status(&self) -> OutcomeStatus {
        if self.deleted.is_empty() {
            OutcomeStatus::Rejected
        } else if self.not_confirmed.is_empty() {
            OutcomeStatus::Complete
        } else {
            OutcomeStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Keys of the inserted file nodes, in store response order.
    pub uploaded: Vec<PathKey>,
    /// Submitted names the store did not accept.
    pub failed: Vec<String>,
    /// Candidates held back before submission.
    pub excluded: Vec<ExcludedCandidate>,
}

impl UploadReport {
    fn requested(&self) -> usize {
        self.uploaded.len() + self.failed.len() + self.excluded.len()
    }

    pub fn status(&self) -> OutcomeStatus {
        if self.uploaded.is_empty() {
            OutcomeStatus::Rejected
        } else if self.uploaded.len() == self.requested() {
            OutcomeStatus::Complete
        } else {
            OutcomeStatus::Partial
        }
    }

    /// Partial-success summary, when some but not all files made it.
    pub fn partial(&self) -> Option<UploadPartial> {
        (self.status() == OutcomeStatus::Partial).then(|| UploadPartial {
            accepted: self.uploaded.len(),
            submitted: self.requested(),
        })
    }
}

struct Session {
    equipment_id: String,
    index: DocumentIndex,
}

/// Single writer of the document index of the selected equipment.
///
/// Mutating intents take `&mut self`, so at most one is in flight per
/// coordinator. Callers sharing a coordinator wrap it in an async mutex.
pub struct SyncCoordinator<S: DocumentStore> {
    store: S,
    session: Option<Session>,
    events: Arc<EventBus>,
    upload_policy: UploadPolicy,
}

impl<S: DocumentStore> SyncCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            session: None,
            events: Arc::new(EventBus::new()),
            upload_policy: UploadPolicy::default(),
        }
    }

    pub fn with_upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.upload_policy = policy;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.upload_policy
    }

    pub fn equipment_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.equipment_id.as_str())
    }

    /// Read-only view of the current index.
    pub fn index(&self) -> Option<&DocumentIndex> {
        self.session.as_ref().map(|s| &s.index)
    }

    fn current_index(&self) -> Result<&DocumentIndex> {
        self.index().ok_or(SyncError::NoEquipmentSelected)
    }

    // ========== Lifecycle ==========

    /// Switch to `equipment_id`: tear down the current index, then load the
    /// equipment's tree. On failure no index is selected.
    pub async fn select_equipment(&mut self, equipment_id: &str) -> Result<&DocumentIndex> {
        self.close();
        let snapshot = self.store.fetch_tree(equipment_id).await?;
        let index = DocumentIndex::from_snapshot(snapshot)?;
        info!("Loaded {} documents for equipment {}", index.len(), equipment_id);

        self.events.emit(IndexEvent::Loaded {
            equipment_id: equipment_id.to_string(),
            node_count: index.len(),
            timestamp: now_millis(),
        });
        let session = self.session.insert(Session {
            equipment_id: equipment_id.to_string(),
            index,
        });
        Ok(&session.index)
    }

    /// Re-fetch the selected equipment's tree, replacing the index.
    pub async fn reload(&mut self) -> Result<&DocumentIndex> {
        let equipment_id = self
            .equipment_id()
            .ok_or(SyncError::NoEquipmentSelected)?
            .to_string();
        self.select_equipment(&equipment_id).await
    }

    /// Drop the index, e.g. when the owning view closes.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Closing index for equipment {}", session.equipment_id);
            self.events.emit(IndexEvent::Cleared {
                timestamp: now_millis(),
            });
        }
    }

    // ========== Reads ==========

    pub fn children_of(&self, folder_id: &PathKey) -> Result<Vec<&DocumentNode>> {
        Ok(self.current_index()?.children_of(folder_id)?)
    }

    pub fn ancestor_chain(&self, id: &PathKey) -> Result<Vec<&DocumentNode>> {
        Ok(self.current_index()?.ancestor_chain(id)?)
    }

    // ========== Intents ==========

    /// Create folder `name` under `parent_id`. Returns the new key.
    pub async fn request_create_folder(
        &mut self,
        parent_id: &PathKey,
        name: &str,
    ) -> Result<PathKey> {
        let session = self.session.as_mut().ok_or(SyncError::NoEquipmentSelected)?;
        let id = session.index.check_create_folder(parent_id, name)?;

        debug!("Requesting folder {}", id);
        let confirmed = self
            .store
            .create_folder(&session.equipment_id, &id)
            .await
            .inspect_err(|e| warn!("Creating {} failed: {}", id, e))?;
        if !confirmed {
            warn!("Store refused to create {}", id);
            return Err(SyncError::CreateRejected { id });
        }

        session.index.insert_folder(parent_id, name, Some(now_millis()))?;
        info!("Created folder {}", id);
        self.events.emit(IndexEvent::FolderCreated {
            id: id.clone(),
            timestamp: now_millis(),
        });
        Ok(id)
    }

    /// Rename a file or folder. Folder renames re-key the whole subtree once
    /// the store has confirmed.
    pub async fn request_rename(&mut self, id: &PathKey, new_name: &str) -> Result<RenameOutcome> {
        let session = self.session.as_mut().ok_or(SyncError::NoEquipmentSelected)?;
        let plan = session.index.check_rename(id, new_name)?;
        if plan.unchanged {
            debug!("Rename of {} to its current name skipped", id);
            return Ok(RenameOutcome {
                old_id: plan.id,
                new_id: plan.new_id,
                affected: 0,
            });
        }

        let request = RenameRequest {
            old_id: plan.id.clone(),
            content_id: plan.content_id.clone(),
            new_name: plan.new_name.clone(),
            kind: plan.kind,
        };
        debug!("Requesting rename {} -> {}", plan.id, plan.new_name);
        let confirmed = self
            .store
            .rename_node(&session.equipment_id, &request)
            .await
            .inspect_err(|e| warn!("Renaming {} failed: {}", id, e))?;
        if !confirmed {
            warn!("Store refused to rename {}", id);
            return Err(SyncError::RenameRejected { id: id.clone() });
        }

        let outcome = match plan.kind {
            NodeKind::Folder => {
                let applied = session.index.rename_folder(id, new_name)?;
                RenameOutcome {
                    old_id: applied.old_id,
                    new_id: applied.new_id,
                    affected: applied.affected,
                }
            }
            NodeKind::File => {
                session.index.rename_file(id, new_name)?;
                RenameOutcome {
                    old_id: id.clone(),
                    new_id: id.clone(),
                    affected: 0,
                }
            }
        };

        info!(
            "Renamed {} -> {} ({} keys rewritten)",
            outcome.old_id, outcome.new_id, outcome.affected
        );
        self.events.emit(IndexEvent::Renamed {
            old_id: outcome.old_id.clone(),
            new_id: outcome.new_id.clone(),
            affected: outcome.affected,
            timestamp: now_millis(),
        });
        Ok(outcome)
    }

    /// Delete a selection of files and folders. The store may confirm only
    /// part of it; only confirmed ids are removed.
    pub async fn request_delete(&mut self, ids: &[PathKey]) -> Result<DeleteReport> {
        let session = self.session.as_mut().ok_or(SyncError::NoEquipmentSelected)?;
        let selection = session.index.check_delete(ids)?;
        if selection.is_empty() {
            return Ok(DeleteReport::default());
        }

        debug!("Requesting deletion of {} nodes", selection.len());
        let confirmed = self
            .store
            .delete_nodes(&session.equipment_id, &selection)
            .await
            .inspect_err(|e| warn!("Deletion failed: {}", e))?;

        let requested: HashSet<&PathKey> = selection.iter().collect();
        let confirmed: HashSet<&PathKey> = confirmed
            .iter()
            .filter(|id| {
                let known = requested.contains(id);
                if !known {
                    warn!("Store confirmed unrequested deletion of {}", id);
                }
                known
            })
            .collect();

        let mut report = DeleteReport {
            requested: selection.clone(),
            ..DeleteReport::default()
        };
        for id in &selection {
            // Skipped when an ancestor earlier in the batch took it along
            if confirmed.contains(id) && session.index.contains(id) {
                if let Ok(removed) = session.index.remove_subtree(id) {
                    report.removed_nodes += removed.len();
                }
            }
        }
        for id in &selection {
            if session.index.contains(id) {
                report.not_confirmed.push(DeleteNotConfirmed { id: id.clone() });
            } else {
                report.deleted.push(id.clone());
            }
        }

        match report.status() {
            OutcomeStatus::Rejected => warn!("Store deleted none of {} nodes", selection.len()),
            status => info!(
                "Deleted {} of {} nodes ({} with descendants, {:?})",
                report.deleted.len(),
                selection.len(),
                report.removed_nodes,
                status
            ),
        }
        if !report.deleted.is_empty() {
            self.events.emit(IndexEvent::Deleted {
                ids: report.deleted.clone(),
                timestamp: now_millis(),
            });
        }
        Ok(report)
    }

    /// Upload files into `parent_id`. Colliding names are held back; the
    /// store may accept only part of the rest.
    pub async fn request_upload(
        &mut self,
        parent_id: &PathKey,
        candidates: Vec<UploadCandidate>,
    ) -> Result<UploadReport> {
        let session = self.session.as_mut().ok_or(SyncError::NoEquipmentSelected)?;
        let batch =
            upload::prepare_batch(&session.index, parent_id, candidates, &self.upload_policy)?;

        let mut report = UploadReport {
            excluded: batch.excluded,
            ..UploadReport::default()
        };
        for excluded in &report.excluded {
            debug!(
                "Holding back upload '{}': {:?}",
                excluded.normalized, excluded.conflict
            );
        }
        if batch.accepted.is_empty() {
            return Ok(report);
        }

        // (name, size) of each submitted file, consumed as the store answers
        let mut pending: Vec<Option<(String, u64)>> = batch
            .accepted
            .iter()
            .map(|blob| Some((blob.name.clone(), blob.bytes.len() as u64)))
            .collect();

        debug!("Uploading {} files to {}", pending.len(), parent_id);
        let stored = self
            .store
            .upload_files(&session.equipment_id, parent_id, batch.accepted)
            .await
            .inspect_err(|e| warn!("Upload to {} failed: {}", parent_id, e))?;

        for entry in stored {
            let matched = pending
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|(name, _)| *name == entry.name))
                .and_then(Option::take);
            let Some((name, size)) = matched else {
                warn!("Store returned unmatched upload '{}'", entry.name);
                continue;
            };
            match session.index.insert_file(
                parent_id,
                &name,
                &entry.content_id,
                entry.modified_at,
                Some(size),
            ) {
                Ok(id) => report.uploaded.push(id),
                Err(e) => {
                    warn!("Could not index upload '{}': {}", name, e);
                    report.failed.push(name);
                }
            }
        }
        report.failed.extend(pending.into_iter().flatten().map(|(name, _)| name));

        match report.partial() {
            Some(partial) => warn!("Upload to {}: {}", parent_id, partial),
            None => info!("Uploaded {} files to {}", report.uploaded.len(), parent_id),
        }
        if !report.uploaded.is_empty() {
            self.events.emit(IndexEvent::Uploaded {
                ids: report.uploaded.clone(),
                timestamp: now_millis(),
            });
        }
        Ok(report)
    }
}
