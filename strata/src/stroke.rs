// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Expansion of flattened polylines into triangulated stroke ribbons.

use std::f64::consts::PI;
use std::ops::Range;

use peniko::kurbo::{Cap, Join, Point, Rect, Stroke, Vec2};
use smallvec::SmallVec;

/// Points closer than this are merged before expansion.
const DEDUP_EPSILON: f64 = 1e-9;

/// Half length of the segment synthesized for a single-point contour with a visible cap.
const DOT_EPSILON: f64 = 1e-3;

/// Triangulated ribbon of one stroke, plus its silhouette.
///
/// Positions are in the space of the input polyline.
#[derive(Debug, Default)]
pub(crate) struct StrokeExpander {
    pub(crate) positions: Vec<Point>,
    pub(crate) triangles: Vec<[u32; 3]>,
    /// Closed silhouette loops, as ranges of `outline`.
    pub(crate) outline_loops: Vec<Range<usize>>,
    pub(crate) outline: Vec<Point>,
    /// Number of ribbon segments emitted since the last clear.
    pub(crate) segments: usize,
    /// Number of contours expanded since the last clear. Dashes arrive as separate contours.
    pub(crate) pieces: usize,
    scratch: Vec<Point>,
    left: Vec<Point>,
    right: Vec<Point>,
}

/// Parameters shared by every piece of one stroke.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Pen<'a> {
    pub(crate) style: &'a Stroke,
    /// Half the stroke width, already widened to the minimum feature size.
    pub(crate) half_width: f64,
    /// Tolerance for round joins and caps, in the space of the polyline.
    pub(crate) tolerance: f64,
    pub(crate) outline: bool,
}

impl StrokeExpander {
    pub(crate) fn clear(&mut self) {
        self.positions.clear();
        self.triangles.clear();
        self.outline_loops.clear();
        self.outline.clear();
        self.segments = 0;
        self.pieces = 0;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Whether the ribbon may cover a pixel more than once.
    pub(crate) fn may_overlap(&self) -> bool {
        self.pieces > 1 || self.segments > 1
    }

    pub(crate) fn bounds(&self) -> Rect {
        let mut points = self.positions.iter();
        let Some(&first) = points.next() else {
            return Rect::ZERO;
        };
        points.fold(Rect::from_points(first, first), |r, &p| r.union_pt(p))
    }

    /// Expand one flattened contour.
    pub(crate) fn expand(&mut self, polyline: &[[f32; 2]], closed: bool, pen: &Pen<'_>) {
        let mut points = std::mem::take(&mut self.scratch);
        points.clear();
        points.extend(polyline.iter().map(|p| Point::new(p[0] as f64, p[1] as f64)));
        self.expand_piece(&points, closed, pen);
        self.scratch = points;
    }

    fn expand_piece(&mut self, input: &[Point], closed: bool, pen: &Pen<'_>) {
        let mut pts: SmallVec<[Point; 16]> = SmallVec::new();
        for &p in input {
            if pts.last().map_or(true, |&q: &Point| (p - q).hypot() > DEDUP_EPSILON) {
                pts.push(p);
            }
        }
        if closed && pts.len() > 1 && (pts[0] - pts[pts.len() - 1]).hypot() <= DEDUP_EPSILON {
            pts.pop();
        }
        let mut closed = closed;
        match pts.len() {
            0 => return,
            1 => {
                // A dot is only visible through its caps.
                if pen.style.start_cap == Cap::Butt && pen.style.end_cap == Cap::Butt {
                    return;
                }
                let p = pts[0];
                let e = Vec2::new(DOT_EPSILON, 0.0);
                pts = SmallVec::from_slice(&[p - e, p + e]);
                closed = false;
            }
            2 => closed = false,
            _ => {}
        }
        self.pieces += 1;
        let hw = pen.half_width;
        let n = pts.len();
        let seg_count = if closed { n } else { n - 1 };
        self.left.clear();
        self.right.clear();

        let normal = |i: usize| -> (Vec2, Vec2) {
            let d = (pts[(i + 1) % n] - pts[i]).normalize();
            (d, Vec2::new(-d.y, d.x) * hw)
        };

        let mut join_points: SmallVec<[Point; 8]> = SmallVec::new();
        for i in 0..seg_count {
            let a = pts[i];
            let b = pts[(i + 1) % n];
            let (_, ni) = normal(i);
            if i > 0 || closed {
                let prev = if i == 0 { seg_count - 1 } else { i - 1 };
                let (_, np) = normal(prev);
                join_points.clear();
                let outer_is_left = self.join(a, np, ni, pen, &mut join_points);
                if pen.outline {
                    let chain = if outer_is_left {
                        &mut self.left
                    } else {
                        &mut self.right
                    };
                    chain.extend(join_points.iter().copied());
                }
            }
            self.push_quad(a + ni, a - ni, b + ni, b - ni);
            self.segments += 1;
            if pen.outline {
                self.left.push(a + ni);
                self.left.push(b + ni);
                self.right.push(a - ni);
                self.right.push(b - ni);
            }
        }

        let mut start_cap: SmallVec<[Point; 8]> = SmallVec::new();
        let mut end_cap: SmallVec<[Point; 8]> = SmallVec::new();
        if !closed {
            let (d0, n0) = normal(0);
            let (dn, nn) = normal(seg_count - 1);
            self.cap(pts[0], -d0, -n0, n0, pen.style.start_cap, pen, &mut start_cap);
            self.cap(pts[n - 1], dn, nn, -nn, pen.style.end_cap, pen, &mut end_cap);
        }

        if pen.outline {
            if closed {
                self.push_chain_loop(true);
                self.push_chain_loop(false);
            } else {
                let start = self.outline.len();
                self.outline.extend(self.left.iter().copied());
                self.outline.extend(end_cap.iter().copied());
                self.outline.extend(self.right.iter().rev().copied());
                self.outline.extend(start_cap.iter().copied());
                self.outline_loops.push(start..self.outline.len());
            }
        }
    }

    fn push_chain_loop(&mut self, left: bool) {
        let chain = if left { &self.left } else { &self.right };
        let start = self.outline.len();
        self.outline.extend(chain.iter().copied());
        self.outline_loops.push(start..self.outline.len());
    }

    fn vertex(&mut self, p: Point) -> u32 {
        let index = self.positions.len() as u32;
        self.positions.push(p);
        index
    }

    fn push_quad(&mut self, a: Point, b: Point, c: Point, d: Point) {
        let ia = self.vertex(a);
        let ib = self.vertex(b);
        let ic = self.vertex(c);
        let id = self.vertex(d);
        self.triangles.push([ia, ib, ic]);
        self.triangles.push([ic, ib, id]);
    }

    /// Fan from `center` through `points`.
    fn push_fan(&mut self, center: Point, points: &[Point]) {
        if points.len() < 2 {
            return;
        }
        let c = self.vertex(center);
        let mut prev = self.vertex(points[0]);
        for &p in &points[1..] {
            let next = self.vertex(p);
            self.triangles.push([c, prev, next]);
            prev = next;
        }
    }

    /// Fill the outer wedge of the join at `p` between offsets `np` and `ni`.
    ///
    /// Pushes the silhouette points strictly between the two offset corners to `outline` and
    /// returns whether the outer side is the left (`+normal`) side.
    fn join(
        &mut self,
        p: Point,
        np: Vec2,
        ni: Vec2,
        pen: &Pen<'_>,
        outline: &mut SmallVec<[Point; 8]>,
    ) -> bool {
        let cross = np.cross(ni);
        let dot = np.dot(ni);
        let hw = pen.half_width;
        // Nearly straight continuation needs no join.
        if cross.abs() <= 1e-9 * hw * hw && dot > 0.0 {
            return true;
        }
        // Turning toward +normal puts the outer side on the right.
        let s = if cross > 0.0 { -1.0 } else { 1.0 };
        let a = p + np * s;
        let b = p + ni * s;
        match pen.style.join {
            Join::Bevel => self.push_fan(p, &[a, b]),
            Join::Miter => {
                let sum = np + ni;
                let sum_len = sum.hypot();
                let ratio = if sum_len > 0.0 {
                    2.0 * hw / sum_len
                } else {
                    f64::INFINITY
                };
                if ratio <= pen.style.miter_limit {
                    let m = p + sum * (s * 2.0 * hw * hw / (sum_len * sum_len));
                    self.push_fan(p, &[a, m, b]);
                    outline.push(m);
                } else {
                    self.push_fan(p, &[a, b]);
                }
            }
            Join::Round => {
                let from = np * s;
                let to = ni * s;
                let angle = from.cross(to).atan2(from.dot(to));
                let mut points: SmallVec<[Point; 16]> = SmallVec::new();
                points.push(a);
                arc_points(p, from, angle, pen.tolerance, &mut points);
                points.push(b);
                self.push_fan(p, &points);
                outline.extend(points[1..points.len() - 1].iter().copied());
            }
        }
        s > 0.0
    }

    /// Emit the cap at `p`, going from offset `from` to offset `to` around the outward
    /// direction `out`. Pushes the silhouette points between the two corners to `outline`.
    #[allow(clippy::too_many_arguments)]
    fn cap(
        &mut self,
        p: Point,
        out: Vec2,
        from: Vec2,
        to: Vec2,
        cap: Cap,
        pen: &Pen<'_>,
        outline: &mut SmallVec<[Point; 8]>,
    ) {
        let hw = pen.half_width;
        match cap {
            Cap::Butt => {}
            Cap::Square => {
                let e = out * hw;
                let (c0, c1) = (p + from + e, p + to + e);
                self.push_quad(p + from, p + to, c0, c1);
                outline.push(c0);
                outline.push(c1);
            }
            Cap::Round => {
                let angle = if from.cross(out) >= 0.0 { PI } else { -PI };
                let mut points: SmallVec<[Point; 16]> = SmallVec::new();
                points.push(p + from);
                arc_points(p, from, angle, pen.tolerance, &mut points);
                points.push(p + to);
                self.push_fan(p, &points);
                outline.extend(points[1..points.len() - 1].iter().copied());
            }
        }
    }
}

/// Push the points strictly inside the arc of `angle` radians from `center + from`.
fn arc_points(
    center: Point,
    from: Vec2,
    angle: f64,
    tolerance: f64,
    out: &mut SmallVec<[Point; 16]>,
) {
    let r = from.hypot();
    if r <= 0.0 || angle == 0.0 {
        return;
    }
    let max_step = if tolerance < r {
        2.0 * (1.0 - tolerance / r).acos()
    } else {
        PI / 2.0
    };
    let steps = (angle.abs() / max_step.max(1e-3)).ceil().clamp(1.0, 256.0) as usize;
    let step = angle / steps as f64;
    for k in 1..steps {
        let (sin, cos) = (step * k as f64).sin_cos();
        let v = Vec2::new(from.x * cos - from.y * sin, from.x * sin + from.y * cos);
        out.push(center + v);
    }
}

#[cfg(test)]
mod tests {
    use super::{Pen, StrokeExpander};
    use peniko::kurbo::{Cap, Join, Stroke};

    fn pen(style: &Stroke) -> Pen<'_> {
        Pen {
            style,
            half_width: style.width / 2.0,
            tolerance: 0.25,
            outline: true,
        }
    }

    fn area(expander: &StrokeExpander) -> f64 {
        expander
            .triangles
            .iter()
            .map(|t| {
                let [a, b, c] = t.map(|i| expander.positions[i as usize]);
                ((b - a).cross(c - a) / 2.0).abs()
            })
            .sum()
    }

    #[test]
    fn straight_segment_is_one_quad() {
        let style = Stroke::new(2.0).with_caps(Cap::Butt);
        let mut expander = StrokeExpander::default();
        expander.expand(&[[0.0, 0.0], [10.0, 0.0]], false, &pen(&style));
        assert_eq!(expander.triangles.len(), 2);
        assert!((area(&expander) - 20.0).abs() < 1e-9);
        assert!(!expander.may_overlap());
        assert_eq!(expander.outline_loops.len(), 1);
    }

    #[test]
    fn zero_length_input_emits_nothing() {
        let style = Stroke::new(2.0).with_caps(Cap::Butt);
        let mut expander = StrokeExpander::default();
        expander.expand(&[], false, &pen(&style));
        expander.expand(&[[3.0, 3.0], [3.0, 3.0]], false, &pen(&style));
        assert!(expander.is_empty());
    }

    #[test]
    fn single_point_with_round_cap_makes_a_dot() {
        let style = Stroke::new(4.0).with_caps(Cap::Round);
        let mut expander = StrokeExpander::default();
        expander.expand(&[[5.0, 5.0]], false, &pen(&style));
        assert!(!expander.is_empty());
        let bounds = expander.bounds();
        assert!((bounds.width() - 4.0).abs() < 0.01);
        assert!((bounds.height() - 4.0).abs() < 0.01);
    }

    #[test]
    fn square_caps_extend_by_half_width() {
        let style = Stroke::new(2.0).with_caps(Cap::Square);
        let mut expander = StrokeExpander::default();
        expander.expand(&[[0.0, 0.0], [10.0, 0.0]], false, &pen(&style));
        let bounds = expander.bounds();
        assert_eq!((bounds.x0, bounds.x1), (-1.0, 11.0));
        assert!((area(&expander) - 24.0).abs() < 1e-9);
    }

    #[test]
    fn miter_join_falls_back_to_bevel() {
        let polyline = [[0.0, 0.0], [10.0, 0.0], [0.0, 0.5]];
        let miter = Stroke::new(2.0).with_join(Join::Miter).with_miter_limit(4.0);
        let mut expander = StrokeExpander::default();
        expander.expand(&polyline, false, &pen(&miter));
        let bevel_bounds = expander.bounds();
        // The miter tip of this sharp turn is far beyond the limit.
        assert!(bevel_bounds.x1 < 12.0);
        assert!(expander.may_overlap());

        let right_angle = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]];
        expander.clear();
        expander.expand(&right_angle, false, &pen(&miter));
        let bounds = expander.bounds();
        assert!((bounds.x1 - 11.0).abs() < 1e-9);
        assert!((bounds.y0 + 1.0).abs() < 1e-9);
    }

    #[test]
    fn round_caps_are_the_default() {
        let style = Stroke::new(2.0);
        let mut expander = StrokeExpander::default();
        expander.expand(&[[0.0, 0.0], [10.0, 0.0]], false, &pen(&style));
        assert!(expander.triangles.len() > 2);
        let bounds = expander.bounds();
        assert!(bounds.x0 < -0.5 && bounds.x0 >= -1.0 - 1e-9);
        assert!(bounds.x1 > 10.5 && bounds.x1 <= 11.0 + 1e-9);
        // A coincident pair still shows as a dot.
        expander.clear();
        expander.expand(&[[3.0, 3.0], [3.0, 3.0]], false, &pen(&style));
        assert!(!expander.is_empty());
    }

    #[test]
    fn separate_contours_may_overlap() {
        let style = Stroke::new(1.0).with_caps(Cap::Butt);
        let mut expander = StrokeExpander::default();
        expander.expand(&[[0.0, 0.0], [2.0, 0.0]], false, &pen(&style));
        assert!(!expander.may_overlap());
        expander.expand(&[[4.0, 0.0], [6.0, 0.0]], false, &pen(&style));
        assert_eq!(expander.pieces, 2);
        assert!(expander.may_overlap());
    }
}
