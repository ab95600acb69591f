//! Ordered play queue with repeat and shuffle
//!
//! Entries keep their insertion order in `entries`; `play_order` holds entry
//! ids in the order they will be played. Without shuffle the two agree. With
//! shuffle, the played prefix and the current entry stay in place and only the
//! remainder is permuted. The permutation is stable until shuffle is toggled
//! or the queue is mutated.

use crate::error::{PlaybackError, Result};
use crate::queue::repeat::RepeatMode;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// One queued song. `entry_id` is stable for the entry's lifetime, so the same
/// song may be queued twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub entry_id: u64,
    pub song_id: String,
    pub stream_url: String,
}

/// Serializable queue state used for session restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    pub play_order: Vec<u64>,
    pub current_entry_id: Option<u64>,
    pub shuffle_enabled: bool,
    pub repeat_mode: RepeatMode,
    pub next_entry_id: u64,
}

pub struct PlaybackQueue {
    entries: Vec<QueueEntry>,
    play_order: Vec<u64>,
    current: Option<usize>,
    shuffle_enabled: bool,
    repeat_mode: RepeatMode,
    last_shuffle: Option<Vec<u64>>,
    next_entry_id: u64,
    rng: StdRng,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue with a caller-provided random source.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            entries: Vec::new(),
            play_order: Vec::new(),
            current: None,
            shuffle_enabled: false,
            repeat_mode: RepeatMode::Off,
            last_shuffle: None,
            next_entry_id: 1,
            rng,
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        let id = *self.play_order.get(self.current?)?;
        self.entry(id)
    }

    /// Position of the current entry in play order.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle_enabled
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// Entries in the order they will be played.
    pub fn play_order(&self) -> Vec<&QueueEntry> {
        self.play_order
            .iter()
            .filter_map(|id| self.entry(*id))
            .collect()
    }

    pub fn entry(&self, entry_id: u64) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Replace the queue, starting at `start_index` of `songs`.
    pub fn replace<I>(&mut self, songs: I, start_index: usize)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.entries.clear();
        for (song_id, stream_url) in songs {
            let entry = self.new_entry(song_id, stream_url);
            self.entries.push(entry);
        }
        self.play_order = self.entries.iter().map(|e| e.entry_id).collect();
        self.current = if self.entries.is_empty() {
            None
        } else {
            Some(start_index.min(self.entries.len() - 1))
        };
        if self.shuffle_enabled {
            self.shuffle_remainder();
        }
    }

    /// Add a song at the end of the queue.
    pub fn append(&mut self, song_id: impl Into<String>, stream_url: impl Into<String>) -> u64 {
        let entry = self.new_entry(song_id.into(), stream_url.into());
        let entry_id = entry.entry_id;
        self.entries.push(entry);
        self.play_order.push(entry_id);
        if self.current.is_none() {
            self.current = Some(0);
        }
        if self.shuffle_enabled {
            self.shuffle_remainder();
        }
        entry_id
    }

    /// Add a song to play right after the current one.
    pub fn play_next(&mut self, song_id: impl Into<String>, stream_url: impl Into<String>) -> u64 {
        let entry = self.new_entry(song_id.into(), stream_url.into());
        let entry_id = entry.entry_id;

        let after_current = self.current.map(|i| i + 1).unwrap_or(0);
        let insert_at = self
            .current()
            .and_then(|current| self.entries.iter().position(|e| e.entry_id == current.entry_id))
            .map(|i| i + 1)
            .unwrap_or(0);
        self.entries.insert(insert_at, entry);
        self.play_order.insert(after_current, entry_id);
        if self.current.is_none() {
            self.current = Some(0);
        }
        entry_id
    }

    pub fn remove(&mut self, entry_id: u64) -> Result<QueueEntry> {
        let entry_pos = self
            .entries
            .iter()
            .position(|e| e.entry_id == entry_id)
            .ok_or(PlaybackError::EntryNotFound(entry_id))?;
        let order_pos = self
            .play_order
            .iter()
            .position(|id| *id == entry_id)
            .ok_or(PlaybackError::EntryNotFound(entry_id))?;

        let entry = self.entries.remove(entry_pos);
        self.play_order.remove(order_pos);

        self.current = match self.current {
            _ if self.play_order.is_empty() => None,
            Some(current) if order_pos < current => Some(current - 1),
            Some(current) => Some(current.min(self.play_order.len() - 1)),
            None => None,
        };
        if self.shuffle_enabled {
            self.shuffle_remainder();
        }
        Ok(entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.play_order.clear();
        self.current = None;
        self.last_shuffle = None;
    }

    /// Make `entry_id` the current entry.
    pub fn jump_to(&mut self, entry_id: u64) -> Result<&QueueEntry> {
        let position = self
            .play_order
            .iter()
            .position(|id| *id == entry_id)
            .ok_or(PlaybackError::EntryNotFound(entry_id))?;
        self.current = Some(position);
        self.current().ok_or(PlaybackError::EntryNotFound(entry_id))
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Advance according to the repeat mode. `None` means playback stops.
    pub fn next(&mut self) -> Option<&QueueEntry> {
        let current = self.current?;
        match self.repeat_mode {
            RepeatMode::One => {}
            _ if current + 1 < self.play_order.len() => self.current = Some(current + 1),
            RepeatMode::All => self.current = Some(0),
            RepeatMode::Off => return None,
        }
        self.current()
    }

    /// Step back according to the repeat mode. `None` at the start with
    /// repeat off.
    pub fn previous(&mut self) -> Option<&QueueEntry> {
        let current = self.current?;
        match self.repeat_mode {
            RepeatMode::One => {}
            _ if current > 0 => self.current = Some(current - 1),
            RepeatMode::All => self.current = Some(self.play_order.len() - 1),
            RepeatMode::Off => return None,
        }
        self.current()
    }

    // ========================================================================
    // Modes
    // ========================================================================

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    pub fn cycle_repeat_mode(&mut self) -> RepeatMode {
        self.repeat_mode = self.repeat_mode.cycle();
        self.repeat_mode
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled {
            self.shuffle_enabled = true;
            self.shuffle_remainder();
        } else if self.shuffle_enabled {
            self.shuffle_enabled = false;
            let current_id = self.current().map(|e| e.entry_id);
            self.play_order = self.entries.iter().map(|e| e.entry_id).collect();
            self.current =
                current_id.and_then(|id| self.play_order.iter().position(|x| *x == id));
        }
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.set_shuffle(!self.shuffle_enabled);
        self.shuffle_enabled
    }

    /// Permute everything after the current entry. Consecutive permutations
    /// differ whenever at least two entries are shuffleable.
    fn shuffle_remainder(&mut self) {
        let head_len = self.current.map(|i| i + 1).unwrap_or(0);
        let head: Vec<u64> = self.play_order[..head_len].to_vec();
        let played: HashSet<u64> = head.iter().copied().collect();
        let mut rest: Vec<u64> = self
            .entries
            .iter()
            .map(|e| e.entry_id)
            .filter(|id| !played.contains(id))
            .collect();

        rest.shuffle(&mut self.rng);
        if rest.len() >= 2 && self.last_shuffle.as_ref() == Some(&rest) {
            rest.rotate_left(1);
        }
        debug!(shuffled = rest.len(), "Shuffled queue remainder");
        self.last_shuffle = Some(rest.clone());

        self.play_order = head;
        self.play_order.extend(rest);
    }

    fn new_entry(&mut self, song_id: String, stream_url: String) -> QueueEntry {
        let entry_id = self.next_entry_id;
        self.next_entry_id += 1;
        QueueEntry {
            entry_id,
            song_id,
            stream_url,
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            entries: self.entries.clone(),
            play_order: self.play_order.clone(),
            current_entry_id: self.current().map(|e| e.entry_id),
            shuffle_enabled: self.shuffle_enabled,
            repeat_mode: self.repeat_mode,
            next_entry_id: self.next_entry_id,
        }
    }

    /// Restore a snapshot. An inconsistent play order falls back to
    /// insertion order with shuffle off.
    pub fn restore(&mut self, snapshot: QueueSnapshot) {
        let ids: HashSet<u64> = snapshot.entries.iter().map(|e| e.entry_id).collect();
        let order: HashSet<u64> = snapshot.play_order.iter().copied().collect();
        let consistent = ids.len() == snapshot.entries.len()
            && order.len() == snapshot.play_order.len()
            && ids == order;

        let max_id = ids.iter().copied().max().unwrap_or(0);
        self.next_entry_id = snapshot.next_entry_id.max(max_id + 1);
        self.repeat_mode = snapshot.repeat_mode;
        self.entries = snapshot.entries;

        if consistent {
            self.play_order = snapshot.play_order;
            self.shuffle_enabled = snapshot.shuffle_enabled;
        } else {
            warn!("Queue snapshot order is inconsistent, restoring insertion order");
            self.play_order = self.entries.iter().map(|e| e.entry_id).collect();
            self.shuffle_enabled = false;
        }
        self.last_shuffle = None;

        self.current = snapshot
            .current_entry_id
            .and_then(|id| self.play_order.iter().position(|x| *x == id))
            .or(if self.play_order.is_empty() { None } else { Some(0) });
    }
}
