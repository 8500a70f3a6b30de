// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::{Batch, BatchIndex, DataChunk, Geometry, Gpaa, Layer, LayerId, Set, TileStrokes};

/// Counters collected while a frame is compiled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Draw calls that produced geometry.
    pub draws: u32,
    /// Draw calls skipped for missing resources, capacity or degenerate geometry.
    pub skipped: u32,
    /// Draw calls merged into an existing batch.
    pub merges: u32,
    pub batches: u32,
    pub triangles: u32,
    pub chunks: u32,
}

/// Selects one of the two geometries of a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Opaque,
    Transparent,
}

/// A step of the draw list, in the order the renderer should execute it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrawCommand {
    /// Composite the finished texture of `layer` into `into`.
    Compose { layer: LayerId, into: LayerId },
    /// Draw a batch into the texture of `target`.
    Draw {
        geometry: GeometryKind,
        batch: BatchIndex,
        target: LayerId,
    },
}

/// Everything produced for one frame.
///
/// A frame is filled by the compiler between `begin` and `end` and is read-only for the
/// renderer afterwards. All indices are stable for the lifetime of the frame.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub opaque: Geometry,
    pub transparent: Geometry,
    pub chunks: Vec<DataChunk>,
    pub tiles: TileStrokes,
    pub gpaa: Gpaa,
    /// Layer 0 is the root.
    pub layers: Vec<Layer>,
    pub sets: Vec<Set>,
    pub stats: FrameStats,
}

impl Frame {
    /// Clear the frame and recreate the root layer.
    pub fn reset(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.opaque.reset();
        self.transparent.reset();
        self.chunks.clear();
        self.tiles.reset();
        self.gpaa.reset();
        self.layers.clear();
        self.layers.push(Layer::root(width, height));
        self.sets.clear();
        self.stats = FrameStats::default();
    }

    pub fn geometry(&self, kind: GeometryKind) -> &Geometry {
        match kind {
            GeometryKind::Opaque => &self.opaque,
            GeometryKind::Transparent => &self.transparent,
        }
    }

    pub fn geometry_mut(&mut self, kind: GeometryKind) -> &mut Geometry {
        match kind {
            GeometryKind::Opaque => &mut self.opaque,
            GeometryKind::Transparent => &mut self.transparent,
        }
    }

    pub fn layer(&self, id: LayerId) -> &Layer {
        debug_assert!(id.index() < self.layers.len(), "unknown layer {id:?}");
        &self.layers[id.index()]
    }

    /// Look up a batch referenced by a [`DrawCommand::Draw`].
    pub fn batch(&self, geometry: GeometryKind, batch: BatchIndex) -> &Batch {
        &self.geometry(geometry).batches[batch.index()]
    }

    /// The draw list for the renderer.
    ///
    /// Sets are walked in order. Each set first composites its compose target, if any, then
    /// draws its opaque batches front-to-back, then its transparent batches in submission order.
    /// Sets of empty layers are skipped, since those layers get no texture.
    pub fn commands(&self) -> impl Iterator<Item = DrawCommand> + '_ {
        let live = |set: &&Set| !self.layer(set.layer).is_empty();
        self.sets.iter().filter(live).flat_map(|set| {
            let target = set.layer;
            let compose = (!set.compose_target.is_root()).then_some(DrawCommand::Compose {
                layer: set.compose_target,
                into: target,
            });
            let opaque = set.opaque.clone().rev().map(move |b| DrawCommand::Draw {
                geometry: GeometryKind::Opaque,
                batch: BatchIndex(b),
                target,
            });
            let transparent = set.transparent.clone().map(move |b| DrawCommand::Draw {
                geometry: GeometryKind::Transparent,
                batch: BatchIndex(b),
                target,
            });
            compose.into_iter().chain(opaque).chain(transparent)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DrawCommand, Frame, GeometryKind};
    use crate::{BatchIndex, CompositeOp, Layer, LayerId, LayerState, Set};
    use peniko::kurbo::Rect;

    fn child_layer(state: LayerState) -> Layer {
        let mut layer = Layer::new(
            LayerId::ROOT,
            Rect::new(0.0, 0.0, 10.0, 10.0),
            0.0,
            CompositeOp::default(),
        );
        layer.state = state;
        layer
    }

    #[test]
    fn reset_keeps_only_root() {
        let mut frame = Frame::default();
        frame.reset(10, 20);
        frame.sets.push(Set::new(LayerId::ROOT, 0, 0, 0));
        frame.reset(30, 40);
        assert_eq!(frame.layers.len(), 1);
        assert!(frame.sets.is_empty());
        assert_eq!(frame.layers[0].texture_size(), [30, 40]);
    }

    #[test]
    fn commands_compose_then_draw() {
        let mut frame = Frame::default();
        frame.reset(10, 10);
        frame.layers.push(child_layer(LayerState::Composited));
        let mut child = Set::new(LayerId(1), 0, 0, 0);
        child.transparent = 0..1;
        let mut parent = Set::new(LayerId::ROOT, 0, 1, 0);
        parent.compose_target = LayerId(1);
        parent.opaque = 0..2;
        frame.sets = vec![child, parent];
        let commands: Vec<_> = frame.commands().collect();
        let draw = |geometry, b, target| DrawCommand::Draw {
            geometry,
            batch: BatchIndex(b),
            target,
        };
        assert_eq!(
            commands,
            [
                draw(GeometryKind::Transparent, 0, LayerId(1)),
                DrawCommand::Compose {
                    layer: LayerId(1),
                    into: LayerId::ROOT
                },
                draw(GeometryKind::Opaque, 1, LayerId::ROOT),
                draw(GeometryKind::Opaque, 0, LayerId::ROOT),
            ]
        );
    }

    #[test]
    fn empty_layers_get_no_draws() {
        let mut frame = Frame::default();
        frame.reset(10, 10);
        frame.layers.push(child_layer(LayerState::Empty));
        let mut child = Set::new(LayerId(1), 0, 0, 0);
        child.opaque = 0..1;
        let mut root = Set::new(LayerId::ROOT, 1, 0, 1);
        root.opaque = 1..2;
        frame.sets = vec![child, root];
        let commands: Vec<_> = frame.commands().collect();
        assert_eq!(
            commands,
            [DrawCommand::Draw {
                geometry: GeometryKind::Opaque,
                batch: BatchIndex(1),
                target: LayerId::ROOT,
            }]
        );
    }
}
