// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::ops::Range;

use peniko::kurbo::Rect;

use crate::index::to_u32;
use crate::{ChunkIndex, Transform};

/// Identifier of an atlas page, i.e. a GPU texture owned by the renderer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// The shader family a batch is drawn with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PaintKind {
    Solid,
    LinearGradient,
    RadialGradient,
    SweepGradient,
    Pattern,
    Image,
    Glyph,
    /// Depth-only geometry written by a clip-out.
    ClipOut,
}

/// Shader parameters of a batch: the paint kind plus its per-kind payload.
///
/// Gradient coordinates are in vertex space, which for paths is the owning layer's space
/// before rebasing. Colors live in the [`DataChunk`](crate::DataChunk), not here, so solid
/// batches of different colors still share parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShaderParams {
    Solid,
    LinearGradient {
        start: [f32; 2],
        end: [f32; 2],
        /// Row in the color-stop atlas.
        ramp: u32,
        extend: u32,
    },
    RadialGradient {
        start_center: [f32; 2],
        start_radius: f32,
        end_center: [f32; 2],
        end_radius: f32,
        ramp: u32,
        extend: u32,
    },
    SweepGradient {
        center: [f32; 2],
        /// Radians.
        start_angle: f32,
        /// Radians.
        end_angle: f32,
        ramp: u32,
        extend: u32,
    },
    Pattern {
        texture: TextureId,
        /// Location of the image in the atlas page, in texels, as `[x0, y0, x1, y1]`.
        atlas_rect: [f32; 4],
        /// Maps vertex space to image texels.
        vertex_to_image: Transform,
        extend: u32,
    },
    /// Textured quads sampling an atlas page with per-vertex uvs.
    Image { texture: TextureId },
    /// Glyph quads sampling a glyph atlas page with per-vertex uvs.
    Glyph { texture: TextureId },
    ClipOut,
}

impl ShaderParams {
    pub fn kind(&self) -> PaintKind {
        match self {
            Self::Solid => PaintKind::Solid,
            Self::LinearGradient { .. } => PaintKind::LinearGradient,
            Self::RadialGradient { .. } => PaintKind::RadialGradient,
            Self::SweepGradient { .. } => PaintKind::SweepGradient,
            Self::Pattern { .. } => PaintKind::Pattern,
            Self::Image { .. } => PaintKind::Image,
            Self::Glyph { .. } => PaintKind::Glyph,
            Self::ClipOut => PaintKind::ClipOut,
        }
    }

    /// Whether the batch's triangles index the textured vertex arrays.
    pub fn is_textured(&self) -> bool {
        matches!(self, Self::Image { .. } | Self::Glyph { .. })
    }

    /// The atlas page sampled by this paint, if any.
    pub fn texture(&self) -> Option<TextureId> {
        match self {
            Self::Pattern { texture, .. } | Self::Image { texture } | Self::Glyph { texture } => {
                Some(*texture)
            }
            _ => None,
        }
    }
}

/// How the stencil pass of a two-pass batch is evaluated by its covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stenciling {
    /// Non-zero winding fill.
    NonZero,
    /// Complement of non-zero, used by clip-outs.
    Zero,
    /// Even-odd fill.
    Odd,
    /// Complement of even-odd, used by clip-outs.
    Even,
    /// Any coverage counts once. Used for overlapping stroke ribbons.
    JustCover,
}

/// The type of a batch and its type-specific spans.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchKind {
    /// Triangles drawn directly.
    Simple,
    /// Triangles written to the stencil buffer, then resolved by the covers in the span.
    TwoPass {
        stenciling: Stenciling,
        covers: Range<u32>,
    },
    /// Packed tile segments drawn by the tile-stroke shader. The triangle span is empty.
    Tiled { segments: Range<u32> },
}

/// A single GPU draw unit: one paint, one clip, one contiguous triangle range.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub kind: BatchKind,
    /// Union of the clipped bounds of every draw in the batch, in layer space.
    pub clip: Rect,
    pub params: ShaderParams,
    pub triangles: Range<u32>,
}

impl Batch {
    pub fn is_simple(&self) -> bool {
        matches!(self.kind, BatchKind::Simple)
    }

    pub fn is_two_pass(&self) -> bool {
        matches!(self.kind, BatchKind::TwoPass { .. })
    }

    pub fn is_tiled(&self) -> bool {
        matches!(self.kind, BatchKind::Tiled { .. })
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangles.end - self.triangles.start
    }

    /// The covers of a two-pass batch. Empty for other batch types.
    pub fn covers(&self) -> Range<u32> {
        match &self.kind {
            BatchKind::TwoPass { covers, .. } => covers.clone(),
            _ => 0..0,
        }
    }
}

/// Cover quad of a stencil-then-cover batch.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Cover {
    /// The quad to draw, in layer space.
    pub rect: Rect,
    /// The clip the quad is drawn with.
    pub clip: Rect,
    pub chunk: ChunkIndex,
}

/// Geometry buffers for one opacity class.
///
/// A frame holds two of these: opaque geometry, which can be depth sorted front-to-back, and
/// transparent geometry, which must be drawn in order.
#[derive(Clone, Debug, Default)]
pub struct Geometry {
    /// Vertex index triples. Textured batches index the `tex_*` arrays, all others index
    /// `positions`.
    pub triangles: Vec<[u32; 3]>,
    pub positions: Vec<[f32; 2]>,
    pub data_indices: Vec<u32>,
    pub tex_positions: Vec<[f32; 2]>,
    pub tex_uvs: Vec<[f32; 2]>,
    pub tex_data_indices: Vec<u32>,
    pub batches: Vec<Batch>,
    pub covers: Vec<Cover>,
}

impl Geometry {
    pub fn reset(&mut self) {
        self.triangles.clear();
        self.positions.clear();
        self.data_indices.clear();
        self.tex_positions.clear();
        self.tex_uvs.clear();
        self.tex_data_indices.clear();
        self.batches.clear();
        self.covers.clear();
    }

    /// Append a plain vertex, returning its index.
    pub fn push_vertex(&mut self, position: [f32; 2], chunk: ChunkIndex) -> u32 {
        let index = to_u32(self.positions.len());
        self.positions.push(position);
        self.data_indices.push(chunk.0);
        index
    }

    /// Append a textured vertex, returning its index.
    pub fn push_textured_vertex(
        &mut self,
        position: [f32; 2],
        uv: [f32; 2],
        chunk: ChunkIndex,
    ) -> u32 {
        let index = to_u32(self.tex_positions.len());
        self.tex_positions.push(position);
        self.tex_uvs.push(uv);
        self.tex_data_indices.push(chunk.0);
        index
    }

    pub fn triangle_len(&self) -> u32 {
        to_u32(self.triangles.len())
    }

    pub fn cover_len(&self) -> u32 {
        to_u32(self.covers.len())
    }

    /// Reverse the triangle array and remap every batch's span to match.
    ///
    /// Each batch keeps its triangles, but in reverse submission order, so drawing the batches
    /// of a set back to front draws the geometry front-to-back.
    pub fn reverse_triangles(&mut self) {
        let len = self.triangle_len();
        self.triangles.reverse();
        for batch in &mut self.batches {
            let span = batch.triangles.clone();
            batch.triangles = (len - span.end)..(len - span.start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Batch, BatchKind, Geometry, ShaderParams};
    use crate::ChunkIndex;
    use peniko::kurbo::Rect;

    #[test]
    fn reversing_triangles_remaps_spans() {
        let mut geometry = Geometry::default();
        for i in 0..5 {
            let v = geometry.push_vertex([i as f32, 0.0], ChunkIndex(0));
            geometry.triangles.push([v, v, v]);
        }
        for span in [0..2, 2..5] {
            geometry.batches.push(Batch {
                kind: BatchKind::Simple,
                clip: Rect::ZERO,
                params: ShaderParams::Solid,
                triangles: span,
            });
        }
        geometry.reverse_triangles();
        assert_eq!(geometry.batches[0].triangles, 3..5);
        assert_eq!(geometry.batches[1].triangles, 0..3);
        // The first triangle of the first batch is now its last.
        assert_eq!(geometry.triangles[4], [0, 0, 0]);
    }

    #[test]
    fn textured_params_are_flagged() {
        let image = ShaderParams::Image {
            texture: super::TextureId(1),
        };
        assert!(image.is_textured());
        assert!(!ShaderParams::Solid.is_textured());
        assert_eq!(image.texture(), Some(super::TextureId(1)));
    }
}
