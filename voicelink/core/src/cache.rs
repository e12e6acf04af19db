//! Audio Cache Store
//!
//! Three independent append-only buffers for audio the service pre-loads so
//! the device can play it without a round trip:
//!
//! - **Prompt**: the short beep played when listening starts (`1000`)
//! - **Greeting**: the wake greeting (`1001`)
//! - **SleepReply**: what the device says when a session ends (`1002`)
//!
//! Writes only ever append. Buffers are emptied by an explicit
//! `clear_cache` command and when the connection drops.

use serde::{Deserialize, Serialize};

/// Which cache buffer a frame fills
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheSlot {
    /// Prompt beep
    Prompt,
    /// Wake greeting
    Greeting,
    /// Sleep reply
    SleepReply,
}

impl CacheSlot {
    /// All slots, in wire-tag order
    pub const ALL: [Self; 3] = [Self::Prompt, Self::Greeting, Self::SleepReply];
}

/// The three audio caches owned by the engine
#[derive(Clone, Debug, Default)]
pub struct AudioCache {
    prompt: Vec<u8>,
    greeting: Vec<u8>,
    sleep_reply: Vec<u8>,
}

impl AudioCache {
    /// Create empty caches
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to a slot
    pub fn append(&mut self, slot: CacheSlot, bytes: &[u8]) {
        self.slot_mut(slot).extend_from_slice(bytes);
    }

    /// Contents of a slot
    #[must_use]
    pub fn get(&self, slot: CacheSlot) -> &[u8] {
        match slot {
            CacheSlot::Prompt => &self.prompt,
            CacheSlot::Greeting => &self.greeting,
            CacheSlot::SleepReply => &self.sleep_reply,
        }
    }

    /// Whether every slot is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        CacheSlot::ALL.iter().all(|slot| self.get(*slot).is_empty())
    }

    /// Total cached bytes across all slots
    #[must_use]
    pub fn total_len(&self) -> usize {
        CacheSlot::ALL.iter().map(|slot| self.get(*slot).len()).sum()
    }

    /// Empty every slot
    pub fn clear(&mut self) {
        for slot in CacheSlot::ALL {
            self.slot_mut(slot).clear();
        }
    }

    fn slot_mut(&mut self, slot: CacheSlot) -> &mut Vec<u8> {
        match slot {
            CacheSlot::Prompt => &mut self.prompt,
            CacheSlot::Greeting => &mut self.greeting,
            CacheSlot::SleepReply => &mut self.sleep_reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_is_strictly_additive() {
        let mut cache = AudioCache::new();
        cache.append(CacheSlot::Greeting, b"hel");
        cache.append(CacheSlot::Greeting, b"lo");
        cache.append(CacheSlot::Prompt, b"b");

        assert_eq!(cache.get(CacheSlot::Greeting), b"hello");
        assert_eq!(cache.get(CacheSlot::Prompt), b"b");
        assert!(cache.get(CacheSlot::SleepReply).is_empty());
        assert_eq!(cache.total_len(), 6);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut cache = AudioCache::new();
        cache.clear();
        assert!(cache.is_empty());

        cache.append(CacheSlot::SleepReply, b"zz");
        cache.clear();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_len(), 0);
    }
}
