//! DocumentNode: a single folder or file entry in the index.

use crate::path_key::PathKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

/// One entry of the document index.
///
/// Fields are read through accessors; only [`DocumentIndex`](crate::DocumentIndex)
/// mutates nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentNode {
    pub(crate) id: PathKey,
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) content_id: Option<String>,
    pub(crate) parent_id: Option<PathKey>,
    pub(crate) children_ids: Vec<PathKey>,
    pub(crate) modified_at: Option<u64>,
    pub(crate) size_bytes: Option<u64>,
}

impl DocumentNode {
    pub(crate) fn folder(
        id: PathKey,
        name: String,
        parent_id: PathKey,
        modified_at: Option<u64>,
    ) -> Self {
        Self {
            id,
            name,
            kind: NodeKind::Folder,
            content_id: None,
            parent_id: Some(parent_id),
            children_ids: Vec::new(),
            modified_at,
            size_bytes: None,
        }
    }

    pub(crate) fn file(
        parent_id: PathKey,
        name: String,
        content_id: String,
        modified_at: Option<u64>,
        size_bytes: Option<u64>,
    ) -> Self {
        Self {
            id: parent_id.child(&content_id),
            name,
            kind: NodeKind::File,
            content_id: Some(content_id),
            parent_id: Some(parent_id),
            children_ids: Vec::new(),
            modified_at,
            size_bytes,
        }
    }

    pub fn id(&self) -> &PathKey {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn parent_id(&self) -> Option<&PathKey> {
        self.parent_id.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Immediate children in display order.
    pub fn children_ids(&self) -> &[PathKey] {
        &self.children_ids
    }

    /// Always equal to `children_ids().len()`.
    pub fn children_count(&self) -> usize {
        self.children_ids.len()
    }

    pub fn modified_at(&self) -> Option<u64> {
        self.modified_at
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size_bytes
    }

    /// The key segment this node contributes: folder name or content id.
    pub fn segment(&self) -> Option<&str> {
        match self.kind {
            NodeKind::Folder => Some(self.name.as_str()),
            NodeKind::File => self.content_id.as_deref(),
        }
    }

    /// Key this node must have under its parent.
    pub fn expected_id(&self) -> Option<PathKey> {
        let parent = self.parent_id.as_ref()?;
        Some(parent.child(self.segment()?))
    }

    pub fn to_record(&self) -> DocumentRecord {
        DocumentRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            is_directory: self.is_directory(),
            content_id: self.content_id.clone(),
            parent_id: self.parent_id.clone(),
            children_ids: self.children_ids.clone(),
            children_count: self.children_count(),
            modified_at: self.modified_at,
            size_bytes: self.size_bytes,
        }
    }

    pub(crate) fn from_record(record: DocumentRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            kind: if record.is_directory {
                NodeKind::Folder
            } else {
                NodeKind::File
            },
            content_id: record.content_id,
            parent_id: record.parent_id,
            children_ids: record.children_ids,
            modified_at: record.modified_at,
            size_bytes: record.size_bytes,
        }
    }
}

/// Wire form of a node, as delivered in a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: PathKey,
    pub name: String,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<PathKey>,
    #[serde(default)]
    pub children_ids: Vec<PathKey>,
    #[serde(default)]
    pub children_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl DocumentRecord {
    /// Record for a tree root with no children.
    pub fn root(id: PathKey, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_directory: true,
            content_id: None,
            parent_id: None,
            children_ids: Vec::new(),
            children_count: 0,
            modified_at: None,
            size_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_uses_content_id() {
        let file = DocumentNode::file(
            PathKey::new("R\\Docs"),
            "manual.pdf".into(),
            "abc".into(),
            Some(10),
            Some(2048),
        );
        assert_eq!(file.id().as_str(), "R\\Docs\\abc");
        assert_eq!(file.expected_id(), Some(file.id().clone()));
        assert!(!file.is_directory());
    }

    #[test]
    fn test_record_uses_camel_case() {
        let node = DocumentNode::folder(
            PathKey::new("R\\Docs"),
            "Docs".into(),
            PathKey::new("R"),
            None,
        );
        let json = serde_json::to_value(node.to_record()).unwrap();
        assert_eq!(json["isDirectory"], true);
        assert_eq!(json["parentId"], "R");
        assert_eq!(json["childrenCount"], 0);
        assert!(json.get("contentId").is_none());
    }
}
