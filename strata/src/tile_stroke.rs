// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Thin strokes as packed per-tile segments.
//!
//! Hairlines dominate UI chrome (borders, underlines, separators), and triangulating them
//! produces a lot of small triangles. Instead, each flattened segment is clipped against every
//! [`TILE_SIZE`] pixel tile it can touch and emitted as one [`TileSegment`] per tile. The tile
//! shader evaluates the coverage of the segment's capsule directly.
//!
//! The tile grid lives in vertex space. The shader places each tile through the translation of
//! its chunk, so rebasing a layer doesn't need to touch the packed segments.

use peniko::kurbo::{Cap, Point, Rect, Vec2};
use strata_encoding::math::rect_is_empty;
use strata_encoding::{
    ChunkIndex, TileCap, TileSegment, TileStrokes, TILE_SEGMENT_REACH, TILE_SIZE,
};

/// Coverage of a segment reaches this far beyond its half width.
const AA_MARGIN: f64 = 0.5;

/// Widest stroke whose per-tile segments still fit the packed endpoint range.
pub(crate) const MAX_WIDTH: f64 = 2.0 * (TILE_SEGMENT_REACH as f64 - AA_MARGIN);

/// Half length of the segment synthesized for a single-point contour with a visible cap.
const DOT_EPSILON: f64 = 1e-3;

/// Per-stroke parameters, in vertex space.
#[derive(Copy, Clone, Debug)]
pub(crate) struct TilePen {
    pub(crate) half_width: f64,
    pub(crate) cap: Cap,
}

fn tile_cap(cap: Cap) -> TileCap {
    match cap {
        Cap::Butt => TileCap::Butt,
        Cap::Square => TileCap::Square,
        Cap::Round => TileCap::Round,
    }
}

/// Clips the segment `a`-`b` to `rect` (Liang–Barsky).
fn clip_segment(a: Point, b: Point, rect: Rect) -> Option<(Point, Point)> {
    let d = b - a;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    for (p, q) in [
        (-d.x, a.x - rect.x0),
        (d.x, rect.x1 - a.x),
        (-d.y, a.y - rect.y0),
        (d.y, rect.y1 - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            if t > t1 {
                return None;
            }
            t0 = t0.max(t);
        } else {
            if t < t0 {
                return None;
            }
            t1 = t1.min(t);
        }
    }
    Some((a + d * t0, a + d * t1))
}

#[derive(Debug, Default)]
pub(crate) struct TileStroker {
    points: Vec<Point>,
}

impl TileStroker {
    /// Emit the tile segments of one flattened contour, returning how many were appended.
    ///
    /// Dash pieces arrive as separate open contours. `clip` is the effective clip in vertex space:
    /// tiles outside of it get no segments.
    pub(crate) fn stroke_contour(
        &mut self,
        polyline: &[[f32; 2]],
        closed: bool,
        pen: &TilePen,
        clip: Rect,
        chunk: ChunkIndex,
        out: &mut TileStrokes,
    ) -> usize {
        let start = out.len();
        let mut points = std::mem::take(&mut self.points);
        points.clear();
        for p in polyline {
            let p = Point::new(p[0] as f64, p[1] as f64);
            if points.last() != Some(&p) {
                points.push(p);
            }
        }
        if closed && points.len() > 1 && points[0] != points[points.len() - 1] {
            points.push(points[0]);
        }
        if points.len() == 1 {
            if pen.cap == Cap::Butt {
                self.points = points;
                return 0;
            }
            let p = points[0];
            let e = Vec2::new(DOT_EPSILON, 0.0);
            points = vec![p - e, p + e];
        }
        for pair in points.windows(2) {
            emit_segment(pair[0], pair[1], pen, clip, chunk, out);
        }
        self.points = points;
        out.len() - start
    }
}

fn emit_segment(
    a: Point,
    b: Point,
    pen: &TilePen,
    clip: Rect,
    chunk: ChunkIndex,
    out: &mut TileStrokes,
) {
    let reach = pen.half_width + AA_MARGIN;
    let bbox = Rect::from_points(a, b).inflate(reach, reach).intersect(clip);
    if rect_is_empty(&bbox) {
        return;
    }
    let size = TILE_SIZE as f64;
    let max_tile = u16::MAX as f64;
    let tx0 = (bbox.x0 / size).floor().clamp(0.0, max_tile) as u16;
    let ty0 = (bbox.y0 / size).floor().clamp(0.0, max_tile) as u16;
    // Tiles are half open, so a bbox ending on a tile edge doesn't touch the next tile.
    let tx1 = ((bbox.x1 / size).ceil() - 1.0).clamp(0.0, max_tile) as u16;
    let ty1 = ((bbox.y1 / size).ceil() - 1.0).clamp(0.0, max_tile) as u16;
    let cap = tile_cap(pen.cap);
    for ty in ty0..=ty1 {
        for tx in tx0..=tx1 {
            let origin = Point::new(tx as f64 * size, ty as f64 * size);
            let tile = Rect::from_origin_size(origin, (size, size)).inflate(reach, reach);
            let Some((p0, p1)) = clip_segment(a, b, tile) else {
                continue;
            };
            let p0 = p0 - origin.to_vec2();
            let p1 = p1 - origin.to_vec2();
            out.segments.push(TileSegment::new(
                tx,
                ty,
                [p0.x as f32, p0.y as f32],
                [p1.x as f32, p1.y as f32],
                pen.half_width as f32,
                cap,
            ));
            out.data_indices.push(chunk.0);
        }
    }
}
