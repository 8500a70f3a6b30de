// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flattening of curved paths into polylines.

use std::ops::Range;

use log::warn;
use peniko::kurbo::{self, Affine, BezPath, PathEl, Point, Rect};
use smallvec::SmallVec;

/// One flattened subpath.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatContour {
    /// Range of the contour's points in [`Flattener::points`].
    pub points: Range<usize>,
    /// Closed contours end with a copy of their first point.
    pub closed: bool,
    /// Bounds of the flattened points.
    pub bounds: Rect,
}

impl FlatContour {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Flattens paths into a reusable point buffer.
///
/// Points are in device space: the transform is applied to the control points before
/// subdivision, so the tolerance is in device pixels.
#[derive(Debug, Default)]
pub struct Flattener {
    points: Vec<[f32; 2]>,
    contours: SmallVec<[FlatContour; 4]>,
}

impl Flattener {
    pub fn clear(&mut self) {
        self.points.clear();
        self.contours.clear();
    }

    /// Append the flattened subpaths of `path`, returning the number of points appended.
    ///
    /// A path with non-finite coordinates is dropped entirely.
    pub fn flatten(&mut self, path: &BezPath, transform: Affine, tolerance: f64) -> usize {
        let elements = path.elements().iter().map(|el| transform * *el);
        // A path that contains NaN is ill-defined, so ignore it.
        if elements.clone().any(|el| !is_finite(el)) {
            warn!("A path contains NaN, ignoring it.");
            return 0;
        }
        let start = self.points.len();
        let mut ctx = FlattenCtx {
            flattener: self,
            start: Point::ZERO,
            last: Point::ZERO,
            open: false,
        };
        kurbo::flatten(elements, tolerance, |el| match el {
            PathEl::MoveTo(p) => {
                ctx.finish(false);
                ctx.begin(p);
            }
            PathEl::LineTo(p) => {
                ctx.ensure_open();
                ctx.push(p);
            }
            PathEl::ClosePath => ctx.finish(true),
            // Flattening only produces lines.
            PathEl::QuadTo(..) | PathEl::CurveTo(..) => {}
        });
        ctx.finish(false);
        self.points.len() - start
    }

    pub fn points(&self) -> &[[f32; 2]] {
        &self.points
    }

    pub fn contours(&self) -> &[FlatContour] {
        &self.contours
    }

    /// The points of a contour, including the closing duplicate.
    pub fn contour_points(&self, contour: &FlatContour) -> &[[f32; 2]] {
        &self.points[contour.points.clone()]
    }

    /// The points of a contour as a polygon, without the closing duplicate.
    pub fn polygon(&self, contour: &FlatContour) -> &[[f32; 2]] {
        let points = self.contour_points(contour);
        if contour.closed && points.len() > 1 && points[0] == points[points.len() - 1] {
            &points[..points.len() - 1]
        } else {
            points
        }
    }

    /// Whether a contour has enough distinct points to enclose an area.
    pub fn is_fillable(&self, contour: &FlatContour) -> bool {
        let polygon = self.polygon(contour);
        let mut distinct = 0;
        let mut prev = None;
        for &p in polygon {
            if prev != Some(p) {
                distinct += 1;
                prev = Some(p);
            }
            if distinct >= 3 {
                return true;
            }
        }
        false
    }

    /// Union of all contour bounds.
    pub fn bounds(&self) -> Rect {
        let mut contours = self.contours.iter();
        let Some(first) = contours.next() else {
            return Rect::ZERO;
        };
        contours.fold(first.bounds, |acc, c| acc.union(c.bounds))
    }
}

struct FlattenCtx<'a> {
    flattener: &'a mut Flattener,
    start: Point,
    last: Point,
    open: bool,
}

impl FlattenCtx<'_> {
    fn begin(&mut self, p: Point) {
        let index = self.flattener.points.len();
        self.flattener.points.push(to_f32(p));
        self.flattener.contours.push(FlatContour {
            points: index..index + 1,
            closed: false,
            bounds: Rect::from_points(p, p),
        });
        self.start = p;
        self.last = p;
        self.open = true;
    }

    /// Segments after a `ClosePath` without a `MoveTo` start from the previous start point.
    fn ensure_open(&mut self) {
        if !self.open {
            self.begin(self.last);
        }
    }

    fn push(&mut self, p: Point) {
        self.flattener.points.push(to_f32(p));
        if let Some(contour) = self.flattener.contours.last_mut() {
            contour.points.end += 1;
            contour.bounds = contour.bounds.union_pt(p);
        }
        self.last = p;
    }

    fn finish(&mut self, close: bool) {
        if !self.open {
            return;
        }
        if close {
            if self.last != self.start {
                self.push(self.start);
            }
            if let Some(contour) = self.flattener.contours.last_mut() {
                contour.closed = true;
            }
            self.last = self.start;
        }
        self.open = false;
    }
}

fn is_finite(el: PathEl) -> bool {
    match el {
        PathEl::MoveTo(p) | PathEl::LineTo(p) => p.is_finite(),
        PathEl::QuadTo(p1, p2) => p1.is_finite() && p2.is_finite(),
        PathEl::CurveTo(p1, p2, p3) => p1.is_finite() && p2.is_finite() && p3.is_finite(),
        PathEl::ClosePath => true,
    }
}

fn to_f32(p: Point) -> [f32; 2] {
    [p.x as f32, p.y as f32]
}

/// Whether a polygon is convex, without repeated closing point.
///
/// The test requires every turn to go the same way and the edge direction to change sign at most
/// twice per axis, which rejects self-intersecting stars. Collinear and repeated points are
/// tolerated.
pub(crate) fn is_convex(polygon: &[[f32; 2]]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0_f32;
    let mut x_flips = 0;
    let mut y_flips = 0;
    let mut prev_dx = 0.0_f32;
    let mut prev_dy = 0.0_f32;
    let mut prev_edge: Option<[f32; 2]> = None;
    // Walk every edge once, plus the first again to close the turn sequence.
    for i in 0..=n {
        let a = polygon[i % n];
        let b = polygon[(i + 1) % n];
        let edge = [b[0] - a[0], b[1] - a[1]];
        if edge == [0.0, 0.0] {
            continue;
        }
        if let Some(prev) = prev_edge {
            let cross = prev[0] * edge[1] - prev[1] * edge[0];
            if cross != 0.0 {
                if sign == 0.0 {
                    sign = cross.signum();
                } else if cross.signum() != sign {
                    return false;
                }
            }
        }
        if i < n {
            if edge[0] != 0.0 {
                if prev_dx != 0.0 && edge[0].signum() != prev_dx.signum() {
                    x_flips += 1;
                }
                prev_dx = edge[0];
            }
            if edge[1] != 0.0 {
                if prev_dy != 0.0 && edge[1].signum() != prev_dy.signum() {
                    y_flips += 1;
                }
                prev_dy = edge[1];
            }
        }
        prev_edge = Some(edge);
    }
    sign != 0.0 && x_flips <= 2 && y_flips <= 2
}
