//! Mutation Module
//!
//! Optimistic mutations: serializable patches plus the coordinator that
//! commits or rolls them back.

mod coordinator;
mod patch;

pub use coordinator::{
    CacheView, MutationCoordinator, MutationKind, MutationOperation, MutationOutcome, MutationState,
    OptimisticApply, PendingMutation, Reconcile, Resolution, ARCHIVE_CAPACITY,
};
pub use patch::{CacheWrite, Patch, PatchOp};
