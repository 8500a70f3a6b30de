// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The layer tree: recording-time bookkeeping and end-of-frame finalization.
//!
//! While a frame is recorded, geometry of a layer is emitted in layer space: device space minus
//! the global origin of the layer's clip. At the end of the frame the tree is finalized in two
//! passes. The first pass, leaf first, computes tight content bounds and marks layers without
//! content as empty. The second pass, parents first, rebases every layer onto its bounds so its
//! offscreen texture is as small as possible, and places it in its parent's finalized texture.

use log::trace;
use peniko::kurbo::{Rect, Vec2};
use strata_encoding::math::{rect_contains, rect_is_empty};
use strata_encoding::{CompositeOp, Frame, Layer, LayerId, LayerState, PaintKind, Set, Transform};

/// The stack of open layers and their global placement during recording.
#[derive(Debug, Default)]
pub(crate) struct LayerStack {
    stack: Vec<LayerId>,
    /// Global origin of every layer's space, indexed by layer id.
    origins: Vec<Vec2>,
    /// Global clip of every layer, indexed by layer id.
    clips: Vec<Rect>,
}

impl LayerStack {
    pub(crate) fn reset(&mut self, width: u32, height: u32) {
        self.stack.clear();
        self.stack.push(LayerId::ROOT);
        self.origins.clear();
        self.origins.push(Vec2::ZERO);
        self.clips.clear();
        self.clips.push(Rect::new(0.0, 0.0, width as f64, height as f64));
    }

    pub(crate) fn current(&self) -> LayerId {
        *self.stack.last().unwrap_or(&LayerId::ROOT)
    }

    /// Number of open layers, including the root.
    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn origin(&self, id: LayerId) -> Vec2 {
        self.origins[id.index()]
    }

    pub(crate) fn global_clip(&self, id: LayerId) -> Rect {
        self.clips[id.index()]
    }

    /// Open a child of the current layer, clipped to `global_clip`.
    ///
    /// The clip is rounded out to whole pixels so layer textures stay pixel aligned.
    pub(crate) fn push(
        &mut self,
        frame: &mut Frame,
        global_clip: Rect,
        expand: f64,
        op: CompositeOp,
    ) -> LayerId {
        let parent = self.current();
        let mut clip = global_clip.intersect(self.global_clip(parent)).expand();
        if rect_is_empty(&clip) {
            clip = Rect::from_origin_size(clip.origin(), (0.0, 0.0));
        }
        let origin = clip.origin().to_vec2();
        let relative = clip - self.origin(parent);
        let id = LayerId::new(frame.layers.len());
        frame.layers.push(Layer::new(parent, relative, expand, op));
        self.origins.push(origin);
        self.clips.push(clip);
        self.stack.push(id);
        id
    }

    /// Close the current layer, returning it and its parent.
    pub(crate) fn pop(&mut self) -> (LayerId, LayerId) {
        assert!(
            self.stack.len() > 1,
            "compose_layer called without a matching begin_layer"
        );
        let child = self.stack.pop().unwrap_or(LayerId::ROOT);
        (child, self.current())
    }
}

/// Union of the clips of the batches `set` draws into its layer.
fn set_content(frame: &Frame, set: &Set) -> Option<Rect> {
    let span = |range: &std::ops::Range<u32>| range.start as usize..range.end as usize;
    let opaque = frame.opaque.batches[span(&set.opaque)].iter();
    let transparent = frame.transparent.batches[span(&set.transparent)].iter();
    opaque
        .chain(transparent)
        // Clip-outs only write depth, they don't contribute content.
        .filter(|batch| batch.params.kind() != PaintKind::ClipOut)
        .map(|batch| batch.clip)
        .filter(|clip| !rect_is_empty(clip))
        .reduce(|a, b| a.union(b))
}

fn union(a: Option<Rect>, b: Rect) -> Rect {
    a.map_or(b, |a| a.union(b))
}

/// Compute bounds, rebase geometry and place every layer. Runs once at the end of a frame.
pub(crate) fn finalize(frame: &mut Frame) {
    let count = frame.layers.len();

    // Leaf-first: children are always created after their parent.
    let mut child_bounds: Vec<Option<Rect>> = vec![None; count];
    for index in (1..count).rev() {
        let id = LayerId::new(index);
        let layer = &frame.layers[index];
        let mut content = child_bounds[index];
        // The span also holds the sets of nested layers.
        for set in &frame.sets[layer.sets.start as usize..layer.sets.end as usize] {
            if set.layer != id {
                continue;
            }
            if let Some(rect) = set_content(frame, set) {
                content = Some(union(content, rect));
            }
        }
        let local_clip = Rect::from_origin_size((0.0, 0.0), layer.clip.size());
        let bounds = content.map(|c| c.inflate(layer.expand, layer.expand).intersect(local_clip));
        let layer = &mut frame.layers[index];
        match bounds {
            Some(bounds) if !rect_is_empty(&bounds) => {
                layer.bounds = bounds;
                layer.state = LayerState::BoundsComputed;
                let in_parent = bounds + layer.clip.origin().to_vec2();
                let parent = layer.parent.index();
                child_bounds[parent] = Some(union(child_bounds[parent], in_parent));
            }
            _ => {
                trace!("layer {index} has no content, eliding it");
                layer.bounds = Rect::ZERO;
                layer.state = LayerState::Empty;
            }
        }
    }

    // Parents first: rebase onto the bounds and place in the parent.
    let root = &mut frame.layers[0];
    root.state = LayerState::OffsetFinalized;
    root.offset = [0.0; 2];
    let mut origins: Vec<Vec2> = vec![Vec2::ZERO; count];
    for index in 1..count {
        let layer = &frame.layers[index];
        let parent = layer.parent.index();
        origins[index] = origins[parent] + layer.clip.origin().to_vec2();
        if layer.state == LayerState::Empty {
            continue;
        }
        debug_assert!(
            rect_contains(&Rect::from_origin_size((0.0, 0.0), layer.clip.size()), &layer.bounds),
            "layer {index} bounds {:?} exceed its clip {:?}",
            layer.bounds,
            layer.clip
        );
        let shift = -layer.bounds.origin().to_vec2();
        let (dx, dy) = (shift.x as f32, shift.y as f32);
        let id = LayerId::new(index);
        for set_index in layer.sets.start as usize..layer.sets.end as usize {
            let set = &frame.sets[set_index];
            if set.layer != id {
                continue;
            }
            let (chunks, opaque, transparent) =
                (set.chunks.clone(), set.opaque.clone(), set.transparent.clone());
            for chunk in &mut frame.chunks[chunks.start as usize..chunks.end as usize] {
                chunk.translate(dx, dy);
            }
            for batch in &mut frame.opaque.batches[opaque.start as usize..opaque.end as usize] {
                batch.clip = batch.clip + shift;
            }
            for batch in
                &mut frame.transparent.batches[transparent.start as usize..transparent.end as usize]
            {
                batch.clip = batch.clip + shift;
            }
        }
        let parent_offset = frame.layers[parent].offset;
        let layer = &mut frame.layers[index];
        let offset = origins[index] + layer.bounds.origin().to_vec2();
        layer.offset = [offset.x as f32, offset.y as f32];
        layer.transform = Transform::IDENTITY.then_translate(
            layer.offset[0] - parent_offset[0],
            layer.offset[1] - parent_offset[1],
        );
        layer.state = if layer.compose_set.is_some() {
            LayerState::Composited
        } else {
            LayerState::OffsetFinalized
        };
    }

    // Composing an empty layer is a no-op.
    for set in &mut frame.sets {
        if !set.compose_target.is_root() && frame.layers[set.compose_target.index()].is_empty() {
            set.compose_target = LayerId::ROOT;
        }
    }

    frame.gpaa.layer_offsets.clear();
    frame
        .gpaa
        .layer_offsets
        .extend(frame.layers.iter().map(|layer| layer.offset));
}
