//! Upload batch preparation: name normalization and collision checks.

use crate::index::{DocumentIndex, IndexError};
use crate::path_key::{self, PathKey};
use crate::store::FileBlob;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Extension enforced on uploaded file names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Required extension without the dot; `None` accepts any name.
    #[serde(default = "default_extension")]
    pub extension: Option<String>,
}

fn default_extension() -> Option<String> {
    Some("pdf".to_string())
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            extension: default_extension(),
        }
    }
}

impl UploadPolicy {
    pub fn any() -> Self {
        Self { extension: None }
    }

    pub fn with_extension(extension: &str) -> Self {
        Self {
            extension: Some(extension.trim_start_matches('.').to_ascii_lowercase()),
        }
    }

    /// Apply the extension rule to a proposed name.
    ///
    /// ```
    /// use docs_core::UploadPolicy;
    ///
    /// let policy = UploadPolicy::default();
    /// assert_eq!(policy.normalize("Manual.PDF"), "Manual.pdf");
    /// assert_eq!(policy.normalize("wiring"), "wiring.pdf");
    /// assert_eq!(policy.normalize("notes.txt"), "notes.txt.pdf");
    /// ```
    pub fn normalize(&self, name: &str) -> String {
        let name = name.trim();
        if name.is_empty() {
            return String::new();
        }
        let Some(ext) = self.extension.as_deref().filter(|e| !e.is_empty()) else {
            return name.to_string();
        };
        match name.rsplit_once('.') {
            Some((stem, current)) if !stem.is_empty() && current.eq_ignore_ascii_case(ext) => {
                format!("{}.{}", stem, ext)
            }
            _ => format!("{}.{}", name, ext),
        }
    }
}

/// A file the caller wants to upload.
#[derive(Debug, Clone)]
pub struct UploadCandidate {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadCandidate {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Why a candidate was held back from submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadConflict {
    /// A file or folder under the parent already shows this name.
    ExistingSibling,
    /// An earlier candidate in the same batch normalizes to this name.
    DuplicateInBatch,
    InvalidName(IndexError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedCandidate {
    /// Name as proposed by the caller.
    pub proposed: String,
    /// Name after normalization.
    pub normalized: String,
    pub conflict: UploadConflict,
}

/// Candidates split into what will be submitted and what was held back.
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    pub accepted: Vec<FileBlob>,
    pub excluded: Vec<ExcludedCandidate>,
}

/// Normalize names and hold back colliding or invalid candidates.
pub fn prepare_batch(
    index: &DocumentIndex,
    parent_id: &PathKey,
    candidates: Vec<UploadCandidate>,
    policy: &UploadPolicy,
) -> Result<PreparedBatch, IndexError> {
    let parent = index.node(parent_id)?;
    if !parent.is_directory() {
        return Err(IndexError::NotADirectory { id: parent_id.clone() });
    }

    let mut batch = PreparedBatch::default();
    let mut claimed = HashSet::new();
    for candidate in candidates {
        let normalized = policy.normalize(&candidate.name);
        let conflict = if let Err(e) = path_key::validate_display_name(&normalized) {
            Some(UploadConflict::InvalidName(e.into()))
        } else if index.name_taken(parent_id, &normalized)? {
            Some(UploadConflict::ExistingSibling)
        } else if !claimed.insert(normalized.clone()) {
            Some(UploadConflict::DuplicateInBatch)
        } else {
            None
        };

        match conflict {
            Some(conflict) => batch.excluded.push(ExcludedCandidate {
                proposed: candidate.name,
                normalized,
                conflict,
            }),
            None => batch.accepted.push(FileBlob {
                name: normalized,
                bytes: candidate.bytes,
            }),
        }
    }
    Ok(batch)
}
