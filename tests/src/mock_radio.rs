//! Mock radio control channel
//!
//! Scriptable availability and channel grants, with every neighbor-list
//! publication recorded for assertions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use roamlink_bts::radio::{NeighborListEntry, RadioControl};

/// The mock radio. Clone-cheap; all clones share state.
#[derive(Clone)]
pub struct MockRadio {
    available: Arc<AtomicBool>,
    grant_channels: Arc<AtomicBool>,
    publications: Arc<Mutex<Vec<Vec<NeighborListEntry>>>>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    pub fn new() -> Self {
        Self {
            available: Arc::new(AtomicBool::new(true)),
            grant_channels: Arc::new(AtomicBool::new(true)),
            publications: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_available(&self, up: bool) {
        self.available.store(up, Ordering::SeqCst);
    }

    pub fn set_grant_channels(&self, grant: bool) {
        self.grant_channels.store(grant, Ordering::SeqCst);
    }

    /// All neighbor lists published so far, in order.
    pub fn publications(&self) -> Vec<Vec<NeighborListEntry>> {
        self.publications.lock().unwrap().clone()
    }
}

#[async_trait]
impl RadioControl for MockRadio {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn push_neighbor_list(&self, entries: Vec<NeighborListEntry>) {
        self.publications.lock().unwrap().push(entries);
    }

    async fn allocate_handover_channel(&self, _reference: u8) -> bool {
        self.grant_channels.load(Ordering::SeqCst)
    }
}
