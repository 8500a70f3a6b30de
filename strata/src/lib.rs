// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Strata is a paint-to-batch compiler for 2D vector graphics.
//!
//! It accepts a stream of drawing commands (path fills and strokes, images, nine-patches, glyph
//! runs, clip-outs and compositing layers), each scoped by a caller-owned [`PaintState`], and
//! compiles them into a minimal, ordered list of GPU draw batches with triangulated geometry,
//! per-draw shader parameters and depth values. It never talks to a GPU itself: the result of a
//! frame is a [`FrameOutput`] that an external renderer uploads and draws.
//!
//! ```ignore
//! let mut painter = Painter::new(PainterOptions::default())?;
//! let textures = TextureCache::new(AtlasConfig::default());
//!
//! painter.begin(width, height)?;
//! let state = PaintState::default();
//! painter.fill_path(&state, &path, &Brush::Solid(palette::css::RED), Fill::NonZero, &textures);
//! let clip = Rect::new(0.0, 0.0, 100.0, 100.0);
//! let layer = painter.begin_layer(&state, clip, 0.0, CompositeOp::with_opacity(0.5));
//! let black = Brush::Solid(palette::css::BLACK);
//! painter.stroke_path(&state, &path, &black, &Stroke::new(1.0), &textures);
//! painter.compose_layer();
//! let output = painter.end();
//! // Upload `output.frame` and `output.ramps`, then walk `output.frame.commands()`.
//! ```

#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
#![allow(missing_docs)]

mod atlas;
mod brush;
mod flatten;
mod layer;
mod painter;
mod ramp_cache;
mod stroke;
mod tile_stroke;

/// Styling and composition primitives.
pub use peniko;
/// 2D geometry, with a focus on curves.
pub use peniko::kurbo;

pub use strata_encoding as encoding;
pub use strata_encoding::{
    Batch, BatchKind, CompositeOp, DataChunk, DrawCommand, Frame, FrameStats, Geometry,
    GeometryKind, Layer, LayerId, LayerState, PaintKind, Set, ShaderParams, Stenciling,
    TextureId, TileSegment,
};

pub use atlas::{
    AtlasCache, AtlasConfig, EvictionListener, GlyphCache, GlyphKey, ImageId, TextureCache,
    TextureSource, TextureView,
};
pub use brush::{Brush, BrushConverter, Converted, Pattern};
pub use flatten::{FlatContour, Flattener};
pub use painter::{DepthTaskId, FrameOutput, Glyph, GlyphRun, Insets, PaintState, Painter};
pub use ramp_cache::{Ramps, RampCache};

use thiserror::Error;

/// Errors that can occur in Strata.
///
/// Draw calls never fail: a draw that lacks a resource or has degenerate geometry is skipped.
/// These errors cover configuration and resource population.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The flattening tolerance must be finite and positive.
    #[error("Flattening tolerance must be positive, got {0}")]
    InvalidTolerance(f64),
    /// The per-draw depth factor must be in `(0, 1)`.
    #[error("Depth decay must be in (0, 1), got {0}")]
    InvalidDepthDecay(f32),
    #[error("The chunk capacity must be non-zero")]
    ZeroChunkCapacity,
    /// Tile stroked segments must fit the packed per-tile endpoint range.
    #[error("Tile stroke width limit must be in (0, {max}], got {width}")]
    InvalidTileStrokeWidth { width: f64, max: f64 },
    /// Frames must fit the 16 bit tile coordinates of the tile stroker.
    #[error("Unsupported frame size {width}x{height}")]
    InvalidFrameSize { width: u32, height: u32 },
    /// The image doesn't fit in an empty atlas page.
    #[error("Image of {width}x{height} is larger than an atlas page")]
    ImageTooLarge { width: u32, height: u32 },
    /// Every atlas page is full and no new page can be allocated.
    #[error("Texture atlas is full")]
    AtlasFull,
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// Options which are set at painter creation time, used in [`Painter::new`].
#[derive(Clone, Debug, PartialEq)]
pub struct PainterOptions {
    /// Maximum deviation of flattened curves from the true curve, in device pixels.
    pub tolerance: f64,
    /// Maximum number of data chunks per frame. Draws beyond this are skipped.
    pub max_chunks: u32,
    /// Factor applied to a layer's depth by every committed draw.
    pub depth_decay: f32,
    /// Strokes thinner than this, in device pixels, are widened to it.
    pub min_feature_size: f64,
    /// Whether thin solid strokes go through the tile stroker.
    pub tile_strokes: bool,
    /// Strokes at least this wide in device pixels are never tile stroked.
    ///
    /// Bounded by the reach of the packed tile segments, a little under 7 pixels.
    pub tile_stroke_max_width: f64,
}

impl Default for PainterOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.25,
            max_chunks: 1 << 16,
            depth_decay: 0.999,
            min_feature_size: 0.5,
            tile_strokes: true,
            tile_stroke_max_width: 3.0,
        }
    }
}

impl PainterOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(Error::InvalidTolerance(self.tolerance));
        }
        if !(self.depth_decay > 0.0 && self.depth_decay < 1.0) {
            return Err(Error::InvalidDepthDecay(self.depth_decay));
        }
        if self.max_chunks == 0 {
            return Err(Error::ZeroChunkCapacity);
        }
        let width = self.tile_stroke_max_width;
        if !(width > 0.0 && width <= tile_stroke::MAX_WIDTH) {
            return Err(Error::InvalidTileStrokeWidth {
                width,
                max: tile_stroke::MAX_WIDTH,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{tile_stroke, Error, PainterOptions};

    #[test]
    fn default_options_are_valid() {
        assert_eq!(PainterOptions::default().validate(), Ok(()));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let options = PainterOptions {
            tolerance: 0.0,
            ..Default::default()
        };
        assert_eq!(options.validate(), Err(Error::InvalidTolerance(0.0)));
        let options = PainterOptions {
            depth_decay: 1.0,
            ..Default::default()
        };
        assert_eq!(options.validate(), Err(Error::InvalidDepthDecay(1.0)));
        let options = PainterOptions {
            max_chunks: 0,
            ..Default::default()
        };
        assert_eq!(options.validate(), Err(Error::ZeroChunkCapacity));
    }

    #[test]
    fn tile_stroke_width_is_bounded_by_the_segment_reach() {
        let max = tile_stroke::MAX_WIDTH;
        let options = PainterOptions {
            tile_stroke_max_width: max,
            ..Default::default()
        };
        assert_eq!(options.validate(), Ok(()));
        for width in [8.0, 0.0, f64::NAN] {
            let options = PainterOptions {
                tile_stroke_max_width: width,
                ..Default::default()
            };
            assert!(matches!(
                options.validate(),
                Err(Error::InvalidTileStrokeWidth { max: m, .. }) if m == max
            ));
        }
    }
}
