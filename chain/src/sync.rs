//! Sync accounting: local tip versus the highest height seen from peers.

/// Tracks how far behind the network this node is.
#[derive(Debug, Default)]
pub struct Synchronizer {
    highest_seen: u64,
    blocks_remaining: u64,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a height advertised by a peer.
    pub fn record_highest(&mut self, height: u64) {
        if height > self.highest_seen {
            self.highest_seen = height;
        }
    }

    pub fn highest_seen(&self) -> u64 {
        self.highest_seen
    }

    /// Begin catching up from `tip` to `target`.
    pub fn start_sync(&mut self, tip: u64, target: u64) {
        self.record_highest(target);
        self.blocks_remaining = target.saturating_sub(tip);
    }

    /// One block accepted; returns whether the node is still syncing.
    pub fn on_accepted_block(&mut self) -> bool {
        self.blocks_remaining = self.blocks_remaining.saturating_sub(1);
        self.is_syncing()
    }

    pub fn is_syncing(&self) -> bool {
        self.blocks_remaining > 0
    }

    /// Sync progress as a percentage in `[0, 100]`.
    ///
    /// The chain can legitimately be ahead of the highest seen height
    /// (consensus usually finishes before peers re-advertise), so the
    /// value is clamped.
    pub fn progress(&self, tip: u64) -> f32 {
        if self.highest_seen == 0 {
            return 0.0;
        }
        let pct = (tip as f64 / self.highest_seen as f64) * 100.0;
        pct.min(100.0) as f32
    }
}
