use std::collections::HashMap;
use std::sync::Mutex;

use catalog::{ContentId, select_width};
use smallvec::SmallVec;

/// Per-(content id, load width) fetch state. There is deliberately no
/// failed variant: a failed fetch removes the entry entirely so the next
/// frame can try a different content id for the tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState<P> {
    Pending,
    Ready(P),
}

/// Shared load-state map keyed by content id and load width.
///
/// Written from exactly two call sites, the render loop (`ensure_requested`)
/// and the fetch workers (`complete`/`fail`), and read freely by the render
/// loop. One map-wide mutex keeps every read/modify/write on a key atomic;
/// contention is low, correctness is the requirement.
#[derive(Debug)]
pub struct LoadStateCache<P> {
    entries: Mutex<HashMap<ContentId, HashMap<u32, LoadState<P>>>>,
}

impl<P> Default for LoadStateCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> LoadStateCache<P> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Atomic check-and-insert: when the key is absent a pending entry is
    /// inserted and `true` comes back, obligating the caller to start the
    /// fetch. A pending or ready key returns `false`, so at most one fetch
    /// is ever in flight per key.
    pub fn ensure_requested(&self, id: ContentId, width: u32) -> bool {
        let mut entries = self.entries.lock().expect("load state cache lock poisoned");
        let widths = entries.entry(id).or_default();
        if widths.contains_key(&width) {
            return false;
        }
        widths.insert(width, LoadState::Pending);
        true
    }

    /// Transitions a pending entry to ready. A no-op when the key was
    /// concurrently failed and removed, so a late completion never
    /// resurrects an evicted entry; an already-ready entry is kept as-is.
    pub fn complete(&self, id: ContentId, width: u32, payload: P) {
        let mut entries = self.entries.lock().expect("load state cache lock poisoned");
        let Some(widths) = entries.get_mut(&id) else {
            return;
        };
        if let Some(state @ LoadState::Pending) = widths.get_mut(&width) {
            *state = LoadState::Ready(payload);
        }
    }

    /// Removes the entry for a failed fetch. The caller additionally evicts
    /// the tile's identity assignment so the next render attempts a
    /// different content id instead of retrying this one.
    pub fn fail(&self, id: ContentId, width: u32) {
        let mut entries = self.entries.lock().expect("load state cache lock poisoned");
        if let Some(widths) = entries.get_mut(&id) {
            widths.remove(&width);
            if widths.is_empty() {
                entries.remove(&id);
            }
        }
    }

    pub fn is_pending(&self, id: ContentId, width: u32) -> bool {
        let entries = self.entries.lock().expect("load state cache lock poisoned");
        matches!(
            entries.get(&id).and_then(|widths| widths.get(&width)),
            Some(LoadState::Pending)
        )
    }

    pub fn ready_width_count(&self, id: ContentId) -> usize {
        let entries = self.entries.lock().expect("load state cache lock poisoned");
        entries
            .get(&id)
            .map(|widths| {
                widths
                    .values()
                    .filter(|state| matches!(state, LoadState::Ready(_)))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl<P: Clone> LoadStateCache<P> {
    /// Best currently-displayable payload for `id`: the resolution selector
    /// policy applied over the set of ready widths. `None` means nothing is
    /// ready yet and the caller shows a placeholder.
    pub fn best_available(&self, id: ContentId, desired_width: u32) -> Option<(u32, P)> {
        let entries = self.entries.lock().expect("load state cache lock poisoned");
        let widths = entries.get(&id)?;
        let ready_widths: SmallVec<[u32; 8]> = widths
            .iter()
            .filter_map(|(width, state)| matches!(state, LoadState::Ready(_)).then_some(*width))
            .collect();
        let chosen = select_width(desired_width, &ready_widths)?;
        match widths.get(&chosen) {
            Some(LoadState::Ready(payload)) => Some((chosen, payload.clone())),
            _ => None,
        }
    }
}
