// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::ops::Range;

use peniko::kurbo::Rect;
use peniko::BlendMode;

use crate::{LayerId, SetIndex, Transform};

/// How a layer's texture is composited into its parent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CompositeOp {
    /// Opacity applied to the whole layer, in `[0, 1]`.
    pub opacity: f32,
    pub blend: BlendMode,
}

impl Default for CompositeOp {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            blend: BlendMode::default(),
        }
    }
}

impl CompositeOp {
    pub fn with_opacity(opacity: f32) -> Self {
        Self {
            opacity,
            ..Self::default()
        }
    }
}

/// Progress of a layer through frame finalization.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LayerState {
    /// Collecting sets. Every layer is open until the frame ends.
    Open,
    /// Content bounds are known and non-empty.
    BoundsComputed,
    /// Chunks have been rebased and the global offset is known.
    OffsetFinalized,
    /// Finalized and composited into its parent by its compose set.
    Composited,
    /// No content survived clipping. The compose of this layer is elided.
    Empty,
}

/// An offscreen compositing group.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    /// Clip in the parent's space.
    pub clip: Rect,
    /// Tight content bounds in the layer's own space, relative to the clip origin.
    ///
    /// Only meaningful once the state is past [`LayerState::Open`].
    pub bounds: Rect,
    pub parent: LayerId,
    /// Running depth of the next draw in this layer.
    pub depth: f32,
    pub op: CompositeOp,
    /// Outset applied to the content bounds, for effects that sample beyond the geometry.
    pub expand: f64,
    /// Sets whose batches draw into this layer. Not necessarily contiguous with child sets
    /// in between, so this is the span from the first to the last.
    pub sets: Range<u32>,
    /// The set in the parent that composites this layer.
    pub compose_set: Option<SetIndex>,
    /// Depth in the parent at which the composite quad is drawn.
    pub compose_depth: f32,
    pub state: LayerState,
    /// Global pixel offset of the layer texture's origin, in frame space.
    pub offset: [f32; 2],
    /// Placement of the layer texture in the parent's finalized texture.
    pub transform: Transform,
}

impl Layer {
    /// The root layer covering a `width` x `height` frame.
    pub fn root(width: u32, height: u32) -> Self {
        let clip = Rect::new(0.0, 0.0, width as f64, height as f64);
        Self {
            clip,
            bounds: clip,
            parent: LayerId::ROOT,
            depth: 1.0,
            op: CompositeOp::default(),
            expand: 0.0,
            sets: 0..0,
            compose_set: None,
            compose_depth: 1.0,
            state: LayerState::Open,
            offset: [0.0; 2],
            transform: Transform::IDENTITY,
        }
    }

    /// A new open layer clipped to `clip` in the parent's space.
    pub fn new(parent: LayerId, clip: Rect, expand: f64, op: CompositeOp) -> Self {
        Self {
            clip,
            bounds: Rect::ZERO,
            parent,
            depth: 1.0,
            op,
            expand,
            sets: 0..0,
            compose_set: None,
            compose_depth: 1.0,
            state: LayerState::Open,
            offset: [0.0; 2],
            transform: Transform::IDENTITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state == LayerState::Empty
    }

    /// Size of the layer's texture in pixels.
    pub fn texture_size(&self) -> [u32; 2] {
        if self.is_empty() {
            return [0, 0];
        }
        [
            self.bounds.width().ceil().max(0.0) as u32,
            self.bounds.height().ceil().max(0.0) as u32,
        ]
    }
}

/// A checkpoint delimiting which batches render into which layer.
///
/// A set is opened whenever the layer context changes. Batches never merge across a set
/// boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct Set {
    /// Batches in the opaque geometry.
    pub opaque: Range<u32>,
    /// Batches in the transparent geometry.
    pub transparent: Range<u32>,
    pub chunks: Range<u32>,
    /// The layer this set's batches draw into.
    pub layer: LayerId,
    /// The layer composited into `layer` before this set's batches are drawn, or
    /// [`LayerId::ROOT`] if none.
    pub compose_target: LayerId,
}

impl Set {
    pub fn new(layer: LayerId, opaque: u32, transparent: u32, chunks: u32) -> Self {
        Self {
            opaque: opaque..opaque,
            transparent: transparent..transparent,
            chunks: chunks..chunks,
            layer,
            compose_target: LayerId::ROOT,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transparent.is_empty() && self.compose_target.is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::{Layer, LayerState, Set};
    use crate::LayerId;

    #[test]
    fn root_covers_frame() {
        let root = Layer::root(64, 32);
        assert_eq!(root.texture_size(), [64, 32]);
        assert_eq!(root.state, LayerState::Open);
    }

    #[test]
    fn fresh_set_is_empty() {
        let set = Set::new(LayerId::new(2), 3, 5, 7);
        assert!(set.is_empty());
        assert_eq!(set.chunks, 7..7);
    }
}
