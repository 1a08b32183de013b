//! docs-core: client-side index of an equipment's document tree.
//!
//! This crate provides:
//! - A flat key → node index with rename and delete cascades
//! - Upload name normalization and collision checks
//! - A coordinator that applies changes only after the store confirms them
//! - The DocumentStore trait abstraction, with an in-memory implementation
//! - Change events and a navigation cursor for browsing views

pub mod coordinator;
pub mod cursor;
pub mod events;
pub mod index;
pub mod node;
pub mod path_key;
pub mod store;
pub mod upload;

pub use coordinator::{
    DeleteNotConfirmed, DeleteReport, OutcomeStatus, RenameOutcome, SyncCoordinator, SyncError,
    UploadPartial, UploadReport,
};
pub use cursor::{ListingOrder, NavigationCursor};
pub use events::{EventBus, IndexEvent, Subscription};
pub use index::{
    DocumentIndex, FolderRename, IndexError, InvariantViolation, RenamePlan, SnapshotError,
};
pub use node::{DocumentNode, DocumentRecord, NodeKind};
pub use path_key::{NameError, PathKey, SEP};
pub use store::{
    DocumentStore, FileBlob, InMemoryStore, RenameRequest, StoreError, StoreOp, StoredFile,
    TreeSnapshot,
};
pub use upload::{ExcludedCandidate, PreparedBatch, UploadCandidate, UploadConflict, UploadPolicy};
