// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};
use peniko::kurbo::Rect;

use crate::math::rect_to_f32;
use crate::Transform;

/// Per-draw record shared by every vertex of one draw call.
///
/// Vertices reference chunks through their data index, so a draw with thousands of vertices
/// stores its transform, clip and color once.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DataChunk {
    /// Maps vertex positions into the owning layer's texture.
    pub transform: Transform,
    /// Depth of the draw, in `(0, 1]`. Later draws in a layer are nearer, i.e. smaller.
    pub depth: f32,
    /// Clip rectangle in the owning layer's space, as `[x0, y0, x1, y1]`.
    pub clip: [f32; 4],
    /// Premultiplied RGBA color, multiplied with the paint in the fragment shader.
    pub color: [f32; 4],
}

impl DataChunk {
    /// Create a chunk at depth `1.0`. The compiler assigns the real depth on commit.
    pub fn new(transform: Transform, clip: Rect, color: [f32; 4]) -> Self {
        Self {
            transform,
            depth: 1.0,
            clip: rect_to_f32(clip),
            color,
        }
    }

    /// Shift the chunk's output by `(dx, dy)`, moving both the transform and the clip.
    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.transform = self.transform.then_translate(dx, dy);
        self.clip[0] += dx;
        self.clip[1] += dy;
        self.clip[2] += dx;
        self.clip[3] += dy;
    }
}

#[cfg(test)]
mod tests {
    use super::DataChunk;
    use crate::Transform;
    use peniko::kurbo::Rect;

    #[test]
    fn translate_moves_clip_and_transform() {
        let mut chunk = DataChunk::new(
            Transform::IDENTITY,
            Rect::new(4.0, 4.0, 8.0, 8.0),
            [1.0; 4],
        );
        chunk.translate(-4.0, -2.0);
        assert_eq!(chunk.clip, [0.0, 2.0, 4.0, 6.0]);
        assert_eq!(chunk.transform.translation, [-4.0, -2.0]);
        assert_eq!(chunk.depth, 1.0);
    }
}
