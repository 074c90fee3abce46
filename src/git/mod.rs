//! Gateway-side git engine
//!
//! - `manager`: handle registry, per-repository locking, operation entry points
//! - `remote`: fetch / fast-forward pull / push / branches
//! - `commit`, `status`: local working-copy operations
//! - `error`: the failure taxonomy shared with the wire protocol

pub mod commit;
pub mod error;
pub mod manager;
pub mod remote;
pub mod status;
pub mod utils;

pub use commit::CommitParams;
pub use error::{ErrorKind, GitOpError};
pub use manager::{
    BusyMode, OperationGuard, OperationTicket, Opened, RepositoryHandle, RepositoryManager,
    StatusReport,
};
pub use utils::{BranchList, FileStatusEntry, MergeOutcome, RefUpdate, DEFAULT_REMOTE};
