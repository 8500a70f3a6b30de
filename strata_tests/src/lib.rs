// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixtures shared by the Strata integration tests.

use smallvec::smallvec;
use strata::kurbo::{BezPath, Point, Rect};
use strata::peniko::{Color, ColorStop, ColorStops, Gradient};
use strata::{AtlasConfig, GlyphCache, PaintState, Painter, PainterOptions, TextureCache};

/// A painter with its caches, recording a frame.
pub struct Harness {
    pub painter: Painter,
    pub textures: TextureCache,
    pub glyphs: GlyphCache,
}

impl Harness {
    /// Begin a `width` x `height` frame with default options.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_options(width, height, PainterOptions::default())
    }

    pub fn with_options(width: u32, height: u32, options: PainterOptions) -> Self {
        let mut painter = Painter::new(options).expect("valid options");
        painter.begin(width, height).expect("valid frame size");
        Self {
            painter,
            textures: TextureCache::new(AtlasConfig::default()),
            glyphs: GlyphCache::new(AtlasConfig::default()),
        }
    }
}

/// Default state without silhouette lines, which most tests don't look at.
pub fn aliased() -> PaintState {
    PaintState::default().with_antialias(false)
}

pub fn polygon(points: &[(f64, f64)]) -> BezPath {
    let mut path = BezPath::new();
    let mut points = points.iter().copied().map(Point::from);
    if let Some(first) = points.next() {
        path.move_to(first);
        for p in points {
            path.line_to(p);
        }
        path.close_path();
    }
    path
}

pub fn triangle() -> BezPath {
    polygon(&[(8.0, 8.0), (40.0, 8.0), (24.0, 40.0)])
}

pub fn rect(rect: Rect) -> BezPath {
    polygon(&[
        (rect.x0, rect.y0),
        (rect.x1, rect.y0),
        (rect.x1, rect.y1),
        (rect.x0, rect.y1),
    ])
}

/// A self-intersecting five pointed star, inside `(0, 0)..(40, 40)`.
pub fn star() -> BezPath {
    polygon(&[
        (20.0, 0.0),
        (32.0, 38.0),
        (0.0, 14.0),
        (40.0, 14.0),
        (8.0, 38.0),
    ])
}

/// An open two-point path.
pub fn line(from: (f64, f64), to: (f64, f64)) -> BezPath {
    let mut path = BezPath::new();
    path.move_to(from);
    path.line_to(to);
    path
}

/// An open three-point path with a right-angle turn.
pub fn corner() -> BezPath {
    let mut path = BezPath::new();
    path.move_to((8.0, 8.0));
    path.line_to((40.0, 8.0));
    path.line_to((40.0, 40.0));
    path
}

pub fn linear_gradient(start: (f64, f64), end: (f64, f64), colors: [Color; 2]) -> Gradient {
    let mut gradient = Gradient::new_linear(start, end);
    gradient.stops = ColorStops(smallvec![
        ColorStop::from((0.0, colors[0])),
        ColorStop::from((1.0, colors[1])),
    ]);
    gradient
}
