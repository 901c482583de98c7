//! phonedir - Core Library
//!
//! A corporate phone directory kept as a forest of record files instead of a
//! database:
//!
//! ```text
//! MainMenu.xml ──▶ zones/<zone>.xml ──▶ branches/<zone>/<branch>.xml ──▶ localities/<id>.xml
//!                                  └──────────────────────────────────▶ localities/<id>.xml
//! ```
//!
//! - [`resolver`]: case-insensitive path lookup, the only way existing files are found
//! - [`store`]: reads and mutations that keep parent menus and child files consistent
//! - [`reconcile`]: merges external feeds into the store, reporting conflicts
//!
//! The record file format itself lives in `phonedir_protocol`.

pub mod config;
pub mod error;
pub mod files;
pub mod lock;
pub mod model;
pub mod reconcile;
pub mod resolver;
pub mod store;

pub use config::{DirectoryConfig, MappingRule};
pub use error::{ErrorKind, PartialFailure, StoreError};
pub use lock::LockMode;
pub use model::{
    Branch, Extension, ExtensionKey, Locality, MainMenu, RecordKey, Zone, ZoneItem, ZoneItemKind,
    ZoneItemRef, ZoneSummary, MISSING_LOCALITY_ID, MISSING_ZONE_ID,
};
pub use reconcile::{
    Conflict, ExternalRecord, FeedKind, FeedOrigin, ReconcileOptions, ReconcileReport, Reconciler,
    RowError, TargetHint,
};
pub use resolver::{PathResolver, ResolveError};
pub use store::{
    CascadeReport, DirectoryStore, EditOutcome, IntegrityReport, MoveDestination, MoveOutcome,
    MoveReport, TreeStats, UpsertSummary,
};

pub use phonedir_ids::{BranchId, LocalityId, ZoneId};
