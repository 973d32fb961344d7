//! `camelpack` sorts photos and videos into a `YYYY/MM/DD/HH_MM.ext`
//! hierarchy derived from their embedded capture time.
//!
//! Transfers can run best-effort or inside a [`transaction::Transaction`],
//! which validates every operation up front and undoes completed work in
//! reverse order when a later one fails.

pub mod bar;
pub mod cli;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod fsops;
pub mod metadata;
pub mod operation;
pub mod reporter;
pub mod resolve;
pub mod transaction;
pub mod version;

pub use error::{FilesError, TransactionError};
pub use fsops::{FilesService, LocalFiles};
pub use metadata::{ExifTool, FileMetadata, MetadataReader};
pub use operation::{Operation, OperationKind};
pub use transaction::Transaction;
