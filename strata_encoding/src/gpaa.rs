// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::index::to_u32;
use crate::{ChunkIndex, LayerId};

/// Silhouette lines for geometric post-process antialiasing.
///
/// Lines are drawn after the geometry of their layer. Their positions are in the same vertex
/// space as the geometry and are placed through the line's chunk transform, like the triangles.
/// `layer_offsets` is filled at the end of the frame with the global pixel offset of every layer,
/// so the post-process can sample the finished frame.
#[derive(Clone, Debug, Default)]
pub struct Gpaa {
    /// Pairs of vertex indices.
    pub lines: Vec<[u32; 2]>,
    pub positions: Vec<[f32; 2]>,
    pub data_indices: Vec<u32>,
    /// Owning layer of each line.
    pub layers: Vec<u32>,
    /// Global pixel offset of each layer, indexed by layer id.
    pub layer_offsets: Vec<[f32; 2]>,
}

impl Gpaa {
    pub fn reset(&mut self) {
        self.lines.clear();
        self.positions.clear();
        self.data_indices.clear();
        self.layers.clear();
        self.layer_offsets.clear();
    }

    fn push_vertex(&mut self, p: [f32; 2], chunk: ChunkIndex) -> u32 {
        let index = to_u32(self.positions.len());
        self.positions.push(p);
        self.data_indices.push(chunk.0);
        index
    }

    /// Append the silhouette of a polyline. Closed polylines also get their closing edge.
    ///
    /// Zero-length edges are skipped.
    pub fn append_polyline(
        &mut self,
        points: &[[f32; 2]],
        closed: bool,
        chunk: ChunkIndex,
        layer: LayerId,
    ) {
        if points.len() < 2 {
            return;
        }
        let first = self.push_vertex(points[0], chunk);
        let mut prev = first;
        let mut prev_point = points[0];
        for &p in &points[1..] {
            if p == prev_point {
                continue;
            }
            let next = self.push_vertex(p, chunk);
            self.lines.push([prev, next]);
            self.layers.push(layer.0);
            prev = next;
            prev_point = p;
        }
        if closed && prev != first && prev_point != points[0] {
            self.lines.push([prev, first]);
            self.layers.push(layer.0);
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}
