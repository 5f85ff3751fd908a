//! Texture residency and slot assignment.
//!
//! The table maps every texture source StageGL has uploaded to its backend
//! handle and tracks which of the program's texture slots it occupies. A
//! slot is free for a new texture when the texture in it was not used by
//! the current batch and the slot is not protected.

use std::collections::HashMap;

use super::backend::TextureHandle;
use crate::display::ImageId;
use crate::error::{Result, StageError};
use crate::tree::NodeId;

/// Which of a node's two render textures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderSide {
    A,
    B,
}

impl RenderSide {
    pub fn other(self) -> Self {
        match self {
            RenderSide::A => RenderSide::B,
            RenderSide::B => RenderSide::A,
        }
    }
}

/// What a resident texture was made from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureKey {
    /// A scene image, re-uploaded when its version changes.
    Image(ImageId),
    /// A node's raster cache surface, re-uploaded on every new generation.
    Cache(NodeId),
    /// One of a node's render textures. Never purged.
    RenderTarget(NodeId, RenderSide),
}

impl TextureKey {
    pub fn is_render_target(self) -> bool {
        matches!(self, TextureKey::RenderTarget(..))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResidentTexture {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    /// Version of the source the pixels were uploaded from.
    pub version: u64,
    /// Slot the texture was last assigned to. It may have been taken since.
    pub active_index: Option<usize>,
    /// Batch generation that last sampled the texture.
    pub batch_id: u64,
    /// Draw generation that last sampled the texture.
    pub draw_id: u64,
}

impl ResidentTexture {
    pub fn new(handle: TextureHandle, width: u32, height: u32, version: u64) -> Self {
        Self {
            handle,
            width,
            height,
            version,
            active_index: None,
            batch_id: 0,
            draw_id: 0,
        }
    }
}

/// Saved slot assignment, see [`TextureTable::backup_slots`].
#[derive(Debug)]
pub struct SlotBackup(Vec<Option<TextureKey>>);

#[derive(Debug)]
pub struct TextureTable {
    entries: HashMap<TextureKey, ResidentTexture>,
    /// Slot contents; `None` binds the base texture.
    slots: Vec<Option<TextureKey>>,
    /// Protected slots, sized to the backend's limit rather than the
    /// program's slot count.
    blacklist: Vec<bool>,
    last_insert: usize,
}

impl TextureTable {
    pub fn new(slot_count: usize, max_slots: usize) -> Self {
        let slot_count = slot_count.max(1);
        Self {
            entries: HashMap::new(),
            slots: vec![None; slot_count],
            blacklist: vec![false; max_slots.max(slot_count)],
            last_insert: slot_count - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn max_slots(&self) -> usize {
        self.blacklist.len()
    }

    pub fn get(&self, key: TextureKey) -> Option<&ResidentTexture> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: TextureKey) -> Option<&mut ResidentTexture> {
        self.entries.get_mut(&key)
    }

    pub fn insert(&mut self, key: TextureKey, texture: ResidentTexture) {
        self.entries.insert(key, texture);
    }

    /// Removes the entry, reverting its slot to the base texture.
    pub fn remove(&mut self, key: TextureKey) -> Option<ResidentTexture> {
        let texture = self.entries.remove(&key)?;
        if let Some(slot) = texture.active_index {
            if self.slots.get(slot) == Some(&Some(key)) {
                self.slots[slot] = None;
            }
        }
        Some(texture)
    }

    pub fn keys(&self) -> impl Iterator<Item = TextureKey> + '_ {
        self.entries.keys().copied()
    }

    /// Purgeable entries last sampled more than `count` draws before
    /// `draw_id`.
    pub fn stale(&self, draw_id: u64, count: u64) -> Vec<TextureKey> {
        let mut keys: Vec<TextureKey> = self
            .entries
            .iter()
            .filter(|(key, tex)| !key.is_render_target() && tex.draw_id + count < draw_id)
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }

    /// Whether the texture still sits in the slot it was last given.
    pub fn bound_slot(&self, key: TextureKey) -> Option<usize> {
        let slot = self.entries.get(&key)?.active_index?;
        (self.slots.get(slot) == Some(&Some(key))).then_some(slot)
    }

    fn slot_free(&self, slot: usize, batch_id: u64) -> bool {
        if self.blacklist.get(slot).copied().unwrap_or(false) {
            return false;
        }
        match self.slots[slot].and_then(|key| self.entries.get(&key)) {
            Some(texture) => texture.batch_id != batch_id,
            None => true,
        }
    }

    /// Looks for a slot not used by batch `batch_id`, starting after the
    /// last insert. `Err` carries the slot the search started from when
    /// every slot is in use.
    pub fn find_free_slot(&self, batch_id: u64) -> std::result::Result<usize, usize> {
        let count = self.slots.len();
        let start = (self.last_insert + 1) % count;
        (0..count)
            .map(|i| (start + i) % count)
            .find(|&slot| self.slot_free(slot, batch_id))
            .ok_or(start)
    }

    /// First unprotected slot from `start` on, or `start` itself if every
    /// slot is protected.
    pub fn first_unprotected_from(&self, start: usize) -> usize {
        let count = self.slots.len();
        (0..count)
            .map(|i| (start + i) % count)
            .find(|&slot| !self.blacklist.get(slot).copied().unwrap_or(false))
            .unwrap_or(start)
    }

    /// Puts the texture in `slot`.
    pub fn assign(&mut self, slot: usize, key: TextureKey) {
        if let Some(texture) = self.entries.get_mut(&key) {
            texture.active_index = Some(slot);
        }
        self.slots[slot] = Some(key);
        self.last_insert = slot;
    }

    /// Marks the texture as sampled by the current draw and batch.
    pub fn touch(&mut self, key: TextureKey, draw_id: u64, batch_id: u64) {
        if let Some(texture) = self.entries.get_mut(&key) {
            texture.draw_id = draw_id;
            texture.batch_id = batch_id;
        }
    }

    /// Handles to bind, one per slot.
    pub fn slot_handles(&self, base: TextureHandle) -> Vec<TextureHandle> {
        self.slots
            .iter()
            .map(|slot| {
                slot.and_then(|key| self.entries.get(&key))
                    .map_or(base, |texture| texture.handle)
            })
            .collect()
    }

    /// Changes the number of slots after a recompile. Textures in dropped
    /// slots are unbound.
    pub fn resize_slots(&mut self, slot_count: usize) {
        let slot_count = slot_count.max(1);
        for key in self.slots.iter().skip(slot_count).flatten() {
            if let Some(texture) = self.entries.get_mut(key) {
                texture.active_index = None;
            }
        }
        self.slots.resize(slot_count, None);
        if self.blacklist.len() < slot_count {
            self.blacklist.resize(slot_count, false);
        }
        self.last_insert = slot_count - 1;
    }

    /// Stops the slot from receiving new textures, or releases it.
    pub fn protect(&mut self, slot: usize, lock: bool) -> Result<()> {
        let max = self.blacklist.len();
        let flag = self.blacklist.get_mut(slot).ok_or(StageError::SlotOutOfRange {
            slot,
            max: max.saturating_sub(1),
        })?;
        *flag = lock;
        Ok(())
    }

    pub fn is_protected(&self, slot: usize) -> bool {
        self.blacklist.get(slot).copied().unwrap_or(false)
    }

    /// Empties every slot, returning what was in them.
    pub fn backup_slots(&mut self) -> SlotBackup {
        let count = self.slots.len();
        let saved = std::mem::replace(&mut self.slots, vec![None; count]);
        SlotBackup(saved)
    }

    /// Puts saved slot contents back. Textures released in the meantime
    /// stay unbound.
    pub fn restore_slots(&mut self, backup: SlotBackup) {
        let SlotBackup(mut saved) = backup;
        saved.resize(self.slots.len(), None);
        for (slot, key) in saved.iter_mut().enumerate() {
            let Some(k) = *key else {
                continue;
            };
            match self.entries.get_mut(&k) {
                Some(texture) => texture.active_index = Some(slot),
                None => *key = None,
            }
        }
        self.slots = saved;
    }
}
