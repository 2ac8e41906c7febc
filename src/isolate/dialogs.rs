//! Isolated half of the dialog proxy: correlation ids that settle at most once

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DialogProxy {
    next_id: u64,
    pending: HashSet<String>,
}

impl DialogProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a correlation id and mark it pending
    pub fn open(&mut self) -> String {
        let id = format!("dialog-{}", self.next_id);
        self.next_id += 1;
        self.pending.insert(id.clone());
        id
    }

    /// Accept a response for `id`. Only the first call for a pending id succeeds.
    pub fn settle(&mut self, id: &str) -> bool {
        self.pending.remove(id)
    }

    /// Give up on `id` after its timeout; later responses are ignored
    pub fn expire(&mut self, id: &str) {
        self.pending.remove(id);
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
