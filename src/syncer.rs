//! The blockchain-sync collaborator (§6): tells the dispatcher whether it is
//! allowed to start scanning yet.

use async_trait::async_trait;

#[async_trait]
pub trait Syncer: Send + Sync {
    /// Whether the local chain view is caught up enough to trust host data.
    async fn synced(&self) -> bool;

    /// The current peer set, used by an online-status check elsewhere in the
    /// reputation database — not consumed directly by the dispatcher.
    async fn peers(&self) -> Vec<String>;
}

/// A syncer that is always synced, for tests and the demo binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSyncedSyncer;

#[async_trait]
impl Syncer for AlwaysSyncedSyncer {
    async fn synced(&self) -> bool {
        true
    }

    async fn peers(&self) -> Vec<String> {
        Vec::new()
    }
}
