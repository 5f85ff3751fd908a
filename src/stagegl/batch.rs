//! Shared vertex storage for one batch.
//!
//! Every card is two triangles, six vertices, written in the order
//! `(L,T) (L,B) (R,T) (L,B) (R,T) (R,B)`.

use wgpu::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

use crate::geom::Rect;
use crate::transform::Transform2D;

pub const VERTICES_PER_CARD: usize = 6;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BatchVertex {
    /// Target space, in pixels.
    pub position: [f32; 2],
    pub uv: [f32; 2],
    /// Texture slot, stored as a float like the other attributes.
    pub texture_index: f32,
    pub alpha: f32,
}

impl BatchVertex {
    pub fn desc() -> VertexBufferLayout<'static> {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<BatchVertex>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: &[
                VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: VertexFormat::Float32x2,
                },
                VertexAttribute {
                    offset: 8,
                    shader_location: 1,
                    format: VertexFormat::Float32x2,
                },
                VertexAttribute {
                    offset: 16,
                    shader_location: 2,
                    format: VertexFormat::Float32,
                },
                VertexAttribute {
                    offset: 20,
                    shader_location: 3,
                    format: VertexFormat::Float32,
                },
            ],
        }
    }
}

/// Texture coordinates of a card's edges.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UvRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl UvRect {
    pub const FULL: UvRect = UvRect {
        left: 0.0,
        top: 0.0,
        right: 1.0,
        bottom: 1.0,
    };

    /// `rect` in texel units of a `width` x `height` texture.
    pub fn from_texels(rect: Rect, width: u32, height: u32) -> Self {
        let (w, h) = (width.max(1) as f64, height.max(1) as f64);
        Self {
            left: (rect.x / w) as f32,
            top: (rect.y / h) as f32,
            right: ((rect.x + rect.width) / w) as f32,
            bottom: ((rect.y + rect.height) / h) as f32,
        }
    }
}

/// Fixed-capacity vertex storage. Filled by the tree walk, drained by a
/// flush.
#[derive(Debug)]
pub struct BatchBuffers {
    vertices: Vec<BatchVertex>,
    cards: usize,
    max_cards: usize,
}

impl BatchBuffers {
    pub fn new(max_cards: usize) -> Self {
        let max_cards = max_cards.max(1);
        Self {
            vertices: vec![BatchVertex::default(); max_cards * VERTICES_PER_CARD],
            cards: 0,
            max_cards,
        }
    }

    pub fn max_cards(&self) -> usize {
        self.max_cards
    }

    pub fn card_count(&self) -> usize {
        self.cards
    }

    pub fn is_empty(&self) -> bool {
        self.cards == 0
    }

    /// Whether one more card would overflow the buffers.
    pub fn is_full(&self) -> bool {
        self.cards + 1 > self.max_cards
    }

    /// The written part of the buffers.
    pub fn vertices(&self) -> &[BatchVertex] {
        &self.vertices[..self.cards * VERTICES_PER_CARD]
    }

    /// The six vertices of one card.
    pub fn card(&self, index: usize) -> Option<&[BatchVertex]> {
        if index >= self.cards {
            return None;
        }
        let start = index * VERTICES_PER_CARD;
        Some(&self.vertices[start..start + VERTICES_PER_CARD])
    }

    pub fn clear(&mut self) {
        self.cards = 0;
    }

    /// Writes the local rectangle `rect` placed by `mtx`. The caller flushes
    /// first when [`BatchBuffers::is_full`].
    pub fn push_card(&mut self, mtx: &Transform2D, rect: Rect, uv: UvRect, slot: usize, alpha: f32) {
        if self.is_full() {
            log::error!("card pushed into a full batch, dropped");
            return;
        }
        let (l, t) = (rect.x, rect.y);
        let (r, b) = (rect.x + rect.width, rect.y + rect.height);
        let place = |x: f64, y: f64| {
            [
                (x * mtx.a + y * mtx.c + mtx.tx) as f32,
                (x * mtx.b + y * mtx.d + mtx.ty) as f32,
            ]
        };
        let lt = place(l, t);
        let lb = place(l, b);
        let rt = place(r, t);
        let rb = place(r, b);
        let corners = [
            (lt, [uv.left, uv.top]),
            (lb, [uv.left, uv.bottom]),
            (rt, [uv.right, uv.top]),
            (lb, [uv.left, uv.bottom]),
            (rt, [uv.right, uv.top]),
            (rb, [uv.right, uv.bottom]),
        ];

        let start = self.cards * VERTICES_PER_CARD;
        for (vertex, (position, uv)) in self.vertices[start..start + VERTICES_PER_CARD]
            .iter_mut()
            .zip(corners)
        {
            *vertex = BatchVertex {
                position,
                uv,
                texture_index: slot as f32,
                alpha,
            };
        }
        self.cards += 1;
    }
}
