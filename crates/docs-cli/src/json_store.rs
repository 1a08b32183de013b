//! Document store on the local filesystem using tokio::fs.
//!
//! Layout under the base directory:
//! - `<equipment>.json` - the equipment's tree as a [`TreeSnapshot`]
//! - `<equipment>/blobs/<content id>` - uploaded file contents

use async_trait::async_trait;
use docs_core::events::now_millis;
use docs_core::store::Result;
use docs_core::{
    DocumentIndex, DocumentStore, FileBlob, NodeKind, PathKey, RenameRequest, StoreError,
    StoredFile, TreeSnapshot,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

pub struct JsonFileStore {
    base_path: PathBuf,
    /// Held across each load-modify-save cycle
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn tree_path(&self, equipment_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", equipment_id))
    }

    fn blob_path(&self, equipment_id: &str, content_id: &str) -> PathBuf {
        self.base_path.join(equipment_id).join("blobs").join(content_id)
    }

    /// True if `equipment_id` has a tree on disk.
    pub async fn exists(&self, equipment_id: &str) -> Result<bool> {
        fs::try_exists(self.tree_path(equipment_id)).await.map_err(io_error)
    }

    /// Create an empty tree whose root is keyed and named `root_name`.
    pub async fn init(&self, equipment_id: &str, root_name: &str) -> Result<TreeSnapshot> {
        let _guard = self.write_lock.lock().await;
        if self.exists(equipment_id).await? {
            return Err(StoreError::Protocol(format!(
                "Equipment {} already has a document tree",
                equipment_id
            )));
        }
        let root_name = root_name.trim();
        if let Err(e) = docs_core::path_key::validate_folder_name(root_name) {
            return Err(StoreError::Protocol(e.to_string()));
        }

        let index = DocumentIndex::with_root(PathKey::new(root_name), root_name);
        self.save(equipment_id, &index).await?;
        debug!("Initialized document tree for {}", equipment_id);
        Ok(index.to_snapshot())
    }

    /// Stored content of an uploaded file.
    pub async fn read_blob(&self, equipment_id: &str, content_id: &str) -> Result<Vec<u8>> {
        fs::read(self.blob_path(equipment_id, content_id))
            .await
            .map_err(io_error)
    }

    async fn load(&self, equipment_id: &str) -> Result<DocumentIndex> {
        let bytes = match fs::read(self.tree_path(equipment_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Protocol(format!("Unknown equipment: {}", equipment_id)));
            }
            Err(e) => return Err(io_error(e)),
        };
        let snapshot: TreeSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Protocol(e.to_string()))?;
        DocumentIndex::from_snapshot(snapshot).map_err(|e| StoreError::Protocol(e.to_string()))
    }

    async fn save(&self, equipment_id: &str, index: &DocumentIndex) -> Result<()> {
        fs::create_dir_all(&self.base_path).await.map_err(io_error)?;
        let json = serde_json::to_vec_pretty(&index.to_snapshot())
            .map_err(|e| StoreError::Protocol(e.to_string()))?;

        // Write then rename so readers never see a half-written tree
        let path = self.tree_path(equipment_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await.map_err(io_error)?;
        fs::rename(&tmp, &path).await.map_err(io_error)
    }

    async fn update<T>(
        &self,
        equipment_id: &str,
        f: impl FnOnce(&mut DocumentIndex) -> T,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.load(equipment_id).await?;
        let result = f(&mut index);
        self.save(equipment_id, &index).await?;
        Ok(result)
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn fetch_tree(&self, equipment_id: &str) -> Result<TreeSnapshot> {
        Ok(self.load(equipment_id).await?.to_snapshot())
    }

    async fn create_folder(&self, equipment_id: &str, folder_id: &PathKey) -> Result<bool> {
        self.update(equipment_id, |index| {
            let Some(parent) = folder_id.parent() else {
                return false;
            };
            index
                .insert_folder(&parent, folder_id.last_segment(), Some(now_millis()))
                .inspect_err(|e| debug!("Refusing folder {}: {}", folder_id, e))
                .is_ok()
        })
        .await
    }

    async fn rename_node(&self, equipment_id: &str, request: &RenameRequest) -> Result<bool> {
        self.update(equipment_id, |index| {
            let renamed = match request.kind {
                NodeKind::Folder => index
                    .rename_folder(&request.old_id, &request.new_name)
                    .map(|_| ()),
                NodeKind::File => index.rename_file(&request.old_id, &request.new_name),
            };
            renamed
                .inspect_err(|e| debug!("Refusing rename of {}: {}", request.old_id, e))
                .is_ok()
        })
        .await
    }

    async fn delete_nodes(&self, equipment_id: &str, ids: &[PathKey]) -> Result<Vec<PathKey>> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.load(equipment_id).await?;

        let mut deleted: Vec<PathKey> = Vec::new();
        let mut orphaned_blobs = Vec::new();
        for id in ids {
            if !index.contains(id) {
                // Went with an ancestor earlier in this batch
                if deleted.iter().any(|d| id.is_descendant_of(d)) {
                    deleted.push(id.clone());
                }
                continue;
            }
            let mut subtree = match index.descendants_of(id) {
                Ok(nodes) => nodes,
                Err(_) => continue,
            };
            subtree.extend(index.get(id));
            let blobs: Vec<String> = subtree
                .iter()
                .filter_map(|node| node.content_id().map(str::to_string))
                .collect();

            if index.remove_subtree(id).is_ok() {
                deleted.push(id.clone());
                orphaned_blobs.extend(blobs);
            }
        }
        self.save(equipment_id, &index).await?;

        for content_id in orphaned_blobs {
            let path = self.blob_path(equipment_id, &content_id);
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove blob {:?}: {}", path, e);
                }
            }
        }
        Ok(deleted)
    }

    async fn upload_files(
        &self,
        equipment_id: &str,
        parent_id: &PathKey,
        files: Vec<FileBlob>,
    ) -> Result<Vec<StoredFile>> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.load(equipment_id).await?;
        if !index.get(parent_id).is_some_and(|node| node.is_directory()) {
            return Ok(Vec::new());
        }

        let blob_dir = self.base_path.join(equipment_id).join("blobs");
        fs::create_dir_all(&blob_dir).await.map_err(io_error)?;

        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            if index.name_taken(parent_id, &file.name).unwrap_or(true) {
                debug!("Refusing upload of '{}': name taken", file.name);
                continue;
            }
            let content_id = uuid::Uuid::new_v4().simple().to_string();
            let modified_at = now_millis();
            let size = file.bytes.len() as u64;
            fs::write(blob_dir.join(&content_id), &file.bytes)
                .await
                .map_err(io_error)?;

            let inserted = index.insert_file(
                parent_id,
                &file.name,
                &content_id,
                Some(modified_at),
                Some(size),
            );
            match inserted {
                Ok(_) => stored.push(StoredFile {
                    name: file.name,
                    content_id,
                    modified_at: Some(modified_at),
                }),
                Err(e) => warn!("Refusing upload of '{}': {}", file.name, e),
            }
        }
        self.save(equipment_id, &index).await?;
        Ok(stored)
    }
}
