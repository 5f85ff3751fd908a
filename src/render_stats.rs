//! Batch statistics for debugging and performance analysis.
//!
//! Every [`StageGL`](crate::stagegl::StageGL) keeps its own counters and
//! hands out a [`BatchStats`] snapshot from `stats()`. They show:
//! - Flushes, split by what forced them
//! - Cards drawn and cover passes run
//! - Texture uploads and evictions
//! - The current draw and batch generations

/// Why a batch was drawn before the walk was done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The shared vertex buffers ran out of cards.
    VertexOverflow,
    /// Every texture slot was taken by the current batch.
    TextureOverflow,
    /// End of a tree walk.
    Final,
    /// A draw started while another was in progress.
    Nested,
}

impl FlushReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushReason::VertexOverflow => "vertexOverflow",
            FlushReason::TextureOverflow => "textureOverflow",
            FlushReason::Final => "final",
            FlushReason::Nested => "nestedDraw",
        }
    }
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of accumulated batch statistics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchStats {
    pub flushes: u64,
    pub vertex_overflow_flushes: u64,
    pub texture_overflow_flushes: u64,
    pub final_flushes: u64,
    pub nested_flushes: u64,
    pub cards: u64,
    pub covers: u64,
    pub uploads: u64,
    pub evictions: u64,
    /// Textures resident when the snapshot was taken.
    pub resident_textures: usize,
    pub draw_id: u64,
    pub batch_id: u64,
}

impl BatchStats {
    /// Record a batch of `cards` drawn for `reason`.
    #[inline]
    pub(crate) fn record_flush(&mut self, reason: FlushReason, cards: usize) {
        self.flushes += 1;
        self.cards += cards as u64;
        match reason {
            FlushReason::VertexOverflow => self.vertex_overflow_flushes += 1,
            FlushReason::TextureOverflow => self.texture_overflow_flushes += 1,
            FlushReason::Final => self.final_flushes += 1,
            FlushReason::Nested => self.nested_flushes += 1,
        }
    }

    /// Record a full-target cover pass (filter or copy).
    #[inline]
    pub(crate) fn record_cover(&mut self) {
        self.covers += 1;
    }

    #[inline]
    pub(crate) fn record_upload(&mut self) {
        self.uploads += 1;
    }

    #[inline]
    pub(crate) fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    /// Flushes forced by `reason`.
    pub fn flushes_for(&self, reason: FlushReason) -> u64 {
        match reason {
            FlushReason::VertexOverflow => self.vertex_overflow_flushes,
            FlushReason::TextureOverflow => self.texture_overflow_flushes,
            FlushReason::Final => self.final_flushes,
            FlushReason::Nested => self.nested_flushes,
        }
    }

    /// Zero the counters. Generations and residency are left alone.
    pub fn reset(&mut self) {
        *self = BatchStats {
            resident_textures: self.resident_textures,
            draw_id: self.draw_id,
            batch_id: self.batch_id,
            ..BatchStats::default()
        };
    }

    /// Print a one-line summary at debug level.
    pub fn log_summary(&self) {
        log::debug!(
            "[BATCH] draw {} | flushes {} (vertex {}, texture {}, final {}, nested {}) | cards {} | covers {} | uploads {} | evictions {} | resident {}",
            self.draw_id,
            self.flushes,
            self.vertex_overflow_flushes,
            self.texture_overflow_flushes,
            self.final_flushes,
            self.nested_flushes,
            self.cards,
            self.covers,
            self.uploads,
            self.evictions,
            self.resident_textures,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flushes_split_by_reason() {
        let mut stats = BatchStats::default();
        stats.record_flush(FlushReason::VertexOverflow, 10);
        stats.record_flush(FlushReason::VertexOverflow, 10);
        stats.record_flush(FlushReason::Final, 3);

        assert_eq!(stats.flushes, 3);
        assert_eq!(stats.cards, 23);
        assert_eq!(stats.flushes_for(FlushReason::VertexOverflow), 2);
        assert_eq!(stats.flushes_for(FlushReason::TextureOverflow), 0);
        assert_eq!(stats.flushes_for(FlushReason::Final), 1);
    }

    #[test]
    fn test_reset_keeps_generations() {
        let mut stats = BatchStats {
            draw_id: 7,
            batch_id: 12,
            resident_textures: 2,
            ..BatchStats::default()
        };
        stats.record_upload();
        stats.record_eviction();
        stats.record_cover();
        stats.reset();

        assert_eq!(stats.uploads + stats.evictions + stats.covers, 0);
        assert_eq!((stats.draw_id, stats.batch_id, stats.resident_textures), (7, 12, 2));
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(FlushReason::VertexOverflow.to_string(), "vertexOverflow");
        assert_eq!(FlushReason::TextureOverflow.as_str(), "textureOverflow");
        assert_eq!(FlushReason::Final.as_str(), "final");
    }
}
