// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytemuck::{Pod, Zeroable};
use peniko::kurbo;

/// Affine transformation matrix, in the layout the vertex shader reads.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    /// 2x2 matrix.
    pub matrix: [f32; 4],
    /// Translation.
    pub translation: [f32; 2],
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        matrix: [1.0, 0.0, 0.0, 1.0],
        translation: [0.0; 2],
    };

    /// Creates a transform from a kurbo affine matrix.
    pub fn from_kurbo(transform: &kurbo::Affine) -> Self {
        let c = transform.as_coeffs().map(|x| x as f32);
        Self {
            matrix: [c[0], c[1], c[2], c[3]],
            translation: [c[4], c[5]],
        }
    }

    /// Shifts the output of the transform by `(dx, dy)`.
    ///
    /// This is how geometry is rebased when a layer's origin moves: the matrix is
    /// untouched and only the translation changes.
    pub fn then_translate(self, dx: f32, dy: f32) -> Self {
        Self {
            matrix: self.matrix,
            translation: [self.translation[0] + dx, self.translation[1] + dy],
        }
    }
}

pub fn point_to_f32(point: kurbo::Point) -> [f32; 2] {
    [point.x as f32, point.y as f32]
}

/// Converts a rectangle to `[x0, y0, x1, y1]`.
pub fn rect_to_f32(rect: kurbo::Rect) -> [f32; 4] {
    [rect.x0 as f32, rect.y0 as f32, rect.x1 as f32, rect.y1 as f32]
}

/// Returns `true` if the rectangle covers no pixels.
///
/// This also treats rectangles with NaN coordinates as empty.
pub fn rect_is_empty(rect: &kurbo::Rect) -> bool {
    !(rect.x1 > rect.x0 && rect.y1 > rect.y0)
}

/// Returns `true` if the interiors of the two rectangles intersect.
pub fn rects_overlap(a: &kurbo::Rect, b: &kurbo::Rect) -> bool {
    a.x0 < b.x1 && b.x0 < a.x1 && a.y0 < b.y1 && b.y0 < a.y1
}

/// Returns `true` if `inner` lies entirely within `outer`.
pub fn rect_contains(outer: &kurbo::Rect, inner: &kurbo::Rect) -> bool {
    inner.x0 >= outer.x0 && inner.y0 >= outer.y0 && inner.x1 <= outer.x1 && inner.y1 <= outer.y1
}
