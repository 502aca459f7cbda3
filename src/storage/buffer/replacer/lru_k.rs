use std::collections::{HashMap, VecDeque};

use crate::common::types::FrameId;
use crate::storage::buffer::error::BufferPoolError;

/// Access history for one tracked frame.
///
/// `history` holds the most recent access timestamps, newest first, capped at
/// K entries; only the two ends are ever inspected, so the cap does not change
/// victim selection.
struct LruKNode {
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            evictable: false,
        }
    }
}

/// LRU-K page replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance:
/// frames with fewer than K recorded accesses count as infinitely distant and
/// are preferred, tie-broken by their earliest recorded access; among frames
/// with a full history the one whose K-th most recent access is oldest wins.
pub struct LruKReplacer {
    node_store: HashMap<FrameId, LruKNode>,
    capacity: usize,
    k: usize,
    curr_size: usize,
    // logical clock; strictly increasing so accesses never tie
    current_timestamp: u64,
}

impl LruKReplacer {
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k > 0");
        Self {
            node_store: HashMap::with_capacity(capacity),
            capacity,
            k,
            curr_size: 0,
            current_timestamp: 0,
        }
    }

    /// Record an access to the given frame, creating its node on first touch
    pub fn record_access(&mut self, frame_id: FrameId) -> Result<(), BufferPoolError> {
        if frame_id as usize >= self.capacity {
            return Err(BufferPoolError::FrameOutOfRange(frame_id));
        }

        self.current_timestamp += 1;
        let now = self.current_timestamp;

        let node = self.node_store.entry(frame_id).or_insert_with(LruKNode::new);
        node.history.push_front(now);
        if node.history.len() > self.k {
            node.history.pop_back();
        }

        Ok(())
    }

    /// Toggle whether a frame may be chosen as a victim; unknown ids are ignored
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let Some(node) = self.node_store.get_mut(&frame_id) else {
            return;
        };

        if evictable && !node.evictable {
            node.evictable = true;
            self.curr_size += 1;
        } else if !evictable && node.evictable {
            node.evictable = false;
            self.curr_size -= 1;
        }
    }

    /// Drop a frame's history entirely; the frame must be evictable if tracked
    pub fn remove(&mut self, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let Some(node) = self.node_store.get(&frame_id) else {
            return Ok(());
        };

        if !node.evictable {
            return Err(BufferPoolError::FrameNotEvictable(frame_id));
        }

        self.node_store.remove(&frame_id);
        self.curr_size -= 1;

        Ok(())
    }

    /// Choose and erase the frame with the largest backward k-distance
    pub fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<FrameId> = None;
        let mut victim_infinite = false;
        let mut victim_oldest = u64::MAX;

        for (&frame_id, node) in &self.node_store {
            if !node.evictable {
                continue;
            }

            let infinite = node.history.len() < self.k;
            // newest first, so the back is the oldest retained access: the
            // first access for a short history, the K-th most recent otherwise
            let oldest = *node.history.back().expect("tracked frame has history");

            let better = match (infinite, victim_infinite) {
                (true, false) => true,
                (false, true) => false,
                _ => oldest < victim_oldest,
            };
            if victim.is_none() || better {
                victim = Some(frame_id);
                victim_infinite = infinite;
                victim_oldest = oldest;
            }
        }

        if let Some(frame_id) = victim {
            self.node_store.remove(&frame_id);
            self.curr_size -= 1;
        }

        victim
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.curr_size
    }
}
