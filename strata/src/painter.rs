// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The batch compiler.
//!
//! A [`Painter`] records one frame at a time. Every draw call converts its brush, flattens and
//! triangulates its geometry into the opaque or transparent [`Geometry`] of the frame, stores
//! one [`DataChunk`] and then either extends the batch at the tail of the current set or opens a
//! new one.
//!
//! Geometry is emitted in vertex space: device space relative to the global origin of the
//! layer being drawn into. Chunks carry the placement into the layer's texture, which is only
//! known once the layer's content bounds are computed in [`Painter::end`].

use std::ops::Range;

use log::{debug, trace};
use peniko::kurbo::{self, Affine, BezPath, Point, Rect, Stroke};
use peniko::{Color, Fill};
use smallvec::SmallVec;
use strata_encoding::math::{point_to_f32, rect_is_empty, rects_overlap};
use strata_encoding::{
    to_u32, Batch, BatchKind, ChunkIndex, CompositeOp, Cover, DataChunk, Frame, Geometry,
    GeometryKind, LayerId, Set, SetIndex, ShaderParams, Stenciling, TextureId, Transform,
    TILE_SIZE,
};

use crate::atlas::{GlyphKey, ImageId, TextureSource, TextureView};
use crate::brush::{Brush, BrushConverter};
use crate::flatten::{is_convex, FlatContour, Flattener};
use crate::layer::{finalize, LayerStack};
use crate::ramp_cache::Ramps;
use crate::stroke::{Pen, StrokeExpander};
use crate::tile_stroke::{TilePen, TileStroker};
use crate::{Error, PainterOptions, Result};

/// Largest frame dimension addressable by 16 bit tile coordinates.
const MAX_FRAME_SIZE: u32 = u16::MAX as u32 * TILE_SIZE;

/// Transforms with a smaller scale than this don't produce visible geometry.
const MIN_SCALE: f64 = 1e-9;

/// Relative tolerance of the uniform scale test.
const UNIFORM_EPSILON: f64 = 1e-6;

/// Per-draw state supplied by the caller.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PaintState {
    /// Maps the draw's local space to device space.
    pub transform: Affine,
    /// Clip in device space.
    pub clip: Rect,
    /// Whether fills and wide strokes emit silhouette lines for post-process antialiasing.
    pub antialias: bool,
    /// Opacity multiplied into the paint.
    pub opacity: f32,
    /// Whether stroke widths and dashes are in local space. Otherwise they are device pixels.
    pub scale_strokes: bool,
}

impl Default for PaintState {
    fn default() -> Self {
        Self {
            transform: Affine::IDENTITY,
            clip: Rect::new(-1e9, -1e9, 1e9, 1e9),
            antialias: true,
            opacity: 1.0,
            scale_strokes: true,
        }
    }
}

impl PaintState {
    pub fn with_transform(self, transform: Affine) -> Self {
        Self { transform, ..self }
    }

    pub fn with_clip(self, clip: Rect) -> Self {
        Self { clip, ..self }
    }

    pub fn with_antialias(self, antialias: bool) -> Self {
        Self { antialias, ..self }
    }

    pub fn with_opacity(self, opacity: f32) -> Self {
        Self { opacity, ..self }
    }
}

/// A positioned glyph of a [`GlyphRun`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Glyph {
    pub id: u32,
    /// Pen position in the local space of the draw.
    pub x: f32,
    pub y: f32,
}

/// A sequence of glyphs sharing a font and size.
#[derive(Copy, Clone, Debug)]
pub struct GlyphRun<'a> {
    pub font_id: u64,
    pub font_size: f32,
    pub glyphs: &'a [Glyph],
}

/// Widths of the fixed borders of a nine-patch.
///
/// The same values apply to the source image, in pixels, and to the destination rectangle, in
/// local units.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Insets {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Insets {
    pub fn uniform(inset: f64) -> Self {
        Self {
            left: inset,
            top: inset,
            right: inset,
            bottom: inset,
        }
    }
}

/// A pending clip-out, returned by [`Painter::clip_out`] and consumed by [`Painter::restore`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DepthTaskId(pub u32);

#[derive(Clone, Debug)]
struct DepthTask {
    chunk: ChunkIndex,
    layer: LayerId,
    resolved: bool,
}

/// The result of a frame, valid until the next [`Painter::begin`].
#[derive(Clone, Debug)]
pub struct FrameOutput<'a> {
    pub frame: &'a Frame,
    /// The color-stop atlas sampled by gradient batches.
    pub ramps: Ramps<'a>,
}

impl FrameOutput<'_> {
    /// The data chunks as bytes, ready for upload.
    pub fn chunk_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.frame.chunks[..])
    }

    /// The packed tile segments as bytes, ready for upload.
    pub fn tile_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.frame.tiles.segments[..])
    }
}

/// Where the geometry of one draw goes.
#[derive(Copy, Clone, Debug)]
struct Placement {
    layer: LayerId,
    /// Maps local space to vertex space.
    to_vertex: Affine,
    /// Effective clip in vertex space.
    clip: Rect,
}

/// Compiles drawing commands into GPU batches.
#[derive(Debug)]
pub struct Painter {
    options: PainterOptions,
    frame: Frame,
    brushes: BrushConverter,
    flattener: Flattener,
    expander: StrokeExpander,
    tile_stroker: TileStroker,
    layers: LayerStack,
    depth_tasks: Vec<DepthTask>,
    glyph_quads: Vec<(TextureView, Rect)>,
    recording: bool,
}

static_assertions::assert_impl_all!(Painter: Send);

impl Painter {
    /// Creates a new painter with the specified options.
    pub fn new(options: PainterOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            brushes: BrushConverter::new(options.max_chunks),
            options,
            frame: Frame::default(),
            flattener: Flattener::default(),
            expander: StrokeExpander::default(),
            tile_stroker: TileStroker::default(),
            layers: LayerStack::default(),
            depth_tasks: Vec::new(),
            glyph_quads: Vec::new(),
            recording: false,
        })
    }

    pub fn options(&self) -> &PainterOptions {
        &self.options
    }

    /// The last frame, or the one being recorded.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Start recording a `width` x `height` frame, discarding the previous one.
    pub fn begin(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 || width > MAX_FRAME_SIZE || height > MAX_FRAME_SIZE {
            return Err(Error::InvalidFrameSize { width, height });
        }
        self.frame.reset(width, height);
        self.brushes.reset();
        self.layers.reset(width, height);
        self.depth_tasks.clear();
        self.open_set(LayerId::ROOT);
        self.recording = true;
        Ok(())
    }

    /// Finish the frame: resolve depths, finalize layers and hand out the result.
    pub fn end(&mut self) -> FrameOutput<'_> {
        self.assert_recording();
        assert_eq!(
            self.layers.depth(),
            1,
            "end called with {} unbalanced begin_layer calls",
            self.layers.depth() - 1
        );
        for task in self.depth_tasks.iter_mut().filter(|task| !task.resolved) {
            let depth = self.frame.layers[task.layer.index()].depth;
            self.frame.chunks[task.chunk.index()].depth = depth;
            task.resolved = true;
        }
        self.frame.opaque.reverse_triangles();
        finalize(&mut self.frame);

        let stats = &mut self.frame.stats;
        stats.batches =
            to_u32(self.frame.opaque.batches.len() + self.frame.transparent.batches.len());
        stats.triangles = self.frame.opaque.triangle_len() + self.frame.transparent.triangle_len();
        stats.chunks = to_u32(self.frame.chunks.len());
        debug!(
            "frame {}x{}: {} draws, {} skipped, {} merged into {} batches, {} triangles, \
             {} tile segments, {} layers",
            self.frame.width,
            self.frame.height,
            stats.draws,
            stats.skipped,
            stats.merges,
            stats.batches,
            stats.triangles,
            self.frame.tiles.len(),
            self.frame.layers.len(),
        );
        self.recording = false;
        FrameOutput {
            frame: &self.frame,
            ramps: self.brushes.ramps().ramps(),
        }
    }

    /// Fill `path` with `brush`. Returns `false` if nothing was drawn.
    pub fn fill_path(
        &mut self,
        state: &PaintState,
        path: &BezPath,
        brush: &Brush,
        fill_rule: Fill,
        textures: &impl TextureSource<ImageId>,
    ) -> bool {
        self.assert_recording();
        let place = self.placement(state);
        let Some(converted) = self.brushes.convert(
            brush,
            state.opacity,
            place.to_vertex,
            self.frame.chunks.len(),
            textures,
        ) else {
            return self.skip("fill with an unavailable brush");
        };
        let contours = self.flatten_fillable(path, place.to_vertex);
        if contours.is_empty() {
            return self.skip("fill without area");
        }
        let bounds = union_bounds(&contours);
        let clip = bounds.intersect(place.clip).expand();
        if rect_is_empty(&clip) {
            return self.skip("fill outside the clip");
        }

        let chunk = self.push_chunk(place, converted.color);
        let kind = if converted.opaque {
            GeometryKind::Opaque
        } else {
            GeometryKind::Transparent
        };
        let geometry = self.frame.geometry_mut(kind);
        let start = geometry.triangle_len();
        for contour in &contours {
            push_fan(geometry, self.flattener.polygon(contour), chunk);
        }
        let simple = contours.len() == 1 && is_convex(self.flattener.polygon(&contours[0]));
        let batch_kind = if simple {
            BatchKind::Simple
        } else {
            let stenciling = match fill_rule {
                Fill::NonZero => Stenciling::NonZero,
                Fill::EvenOdd => Stenciling::Odd,
            };
            BatchKind::TwoPass {
                stenciling,
                covers: push_cover(geometry, clip, place.clip, chunk),
            }
        };
        let batch = Batch {
            kind: batch_kind,
            clip,
            params: converted.params,
            triangles: start..geometry.triangle_len(),
        };
        if state.antialias {
            for contour in &contours {
                self.frame
                    .gpaa
                    .append_polyline(self.flattener.polygon(contour), true, chunk, place.layer);
            }
        }
        self.commit(kind, batch);
        true
    }

    /// Stroke `path` with `brush`. Returns `false` if nothing was drawn.
    ///
    /// Thin solid strokes under an even scale go through the tile stroker, everything else is
    /// expanded into a triangle ribbon.
    pub fn stroke_path(
        &mut self,
        state: &PaintState,
        path: &BezPath,
        brush: &Brush,
        stroke: &Stroke,
        textures: &impl TextureSource<ImageId>,
    ) -> bool {
        self.assert_recording();
        if !stroke.width.is_finite() {
            return self.skip("stroke with a non-finite width");
        }
        let place = self.placement(state);
        let scale = state.transform.determinant().abs().sqrt();
        if scale < MIN_SCALE {
            return self.skip("stroke under a degenerate transform");
        }
        let device_width = if state.scale_strokes {
            stroke.width * scale
        } else {
            stroke.width
        };
        match brush {
            Brush::Solid(color) if self.uses_tile_stroker(state, stroke, device_width) => {
                self.tile_stroke(state, place, path, *color, stroke, device_width, scale)
            }
            _ => self.expand_stroke(state, place, path, brush, stroke, scale, textures),
        }
    }

    fn uses_tile_stroker(&self, state: &PaintState, stroke: &Stroke, device_width: f64) -> bool {
        // One cap per segment in the packed format.
        self.options.tile_strokes
            && stroke.start_cap == stroke.end_cap
            && (!state.scale_strokes || is_uniform_scale(&state.transform))
            && device_width.max(self.options.min_feature_size) < self.options.tile_stroke_max_width
    }

    #[allow(clippy::too_many_arguments)]
    fn tile_stroke(
        &mut self,
        state: &PaintState,
        place: Placement,
        path: &BezPath,
        color: Color,
        stroke: &Stroke,
        device_width: f64,
        scale: f64,
    ) -> bool {
        let Some(converted) = self
            .brushes
            .convert_solid(color, state.opacity, self.frame.chunks.len())
        else {
            return self.skip("stroke over chunk capacity");
        };
        let pen = TilePen {
            half_width: device_width.max(self.options.min_feature_size) / 2.0,
            cap: stroke.start_cap,
        };
        self.flattener.clear();
        if is_dash_pattern(&stroke.dash_pattern) {
            let dash_scale = if state.scale_strokes { scale } else { 1.0 };
            let dashes: SmallVec<[f64; 8]> =
                stroke.dash_pattern.iter().map(|d| d * dash_scale).collect();
            let offset = stroke.dash_offset * dash_scale;
            let dashed = dash_path(path, place.to_vertex, offset, &dashes);
            self.flattener
                .flatten(&dashed, Affine::IDENTITY, self.options.tolerance);
        } else {
            self.flattener
                .flatten(path, place.to_vertex, self.options.tolerance);
        }

        let chunk = ChunkIndex::new(self.frame.chunks.len());
        let start = self.frame.tiles.len();
        for contour in self.flattener.contours() {
            self.tile_stroker.stroke_contour(
                self.flattener.contour_points(contour),
                contour.closed,
                &pen,
                place.clip,
                chunk,
                &mut self.frame.tiles,
            );
        }
        let end = self.frame.tiles.len();
        if end == start {
            return self.skip("stroke without visible segments");
        }
        let reach = pen.half_width + 0.5;
        let clip = self
            .flattener
            .bounds()
            .inflate(reach, reach)
            .intersect(place.clip)
            .expand();
        let pushed = self.push_chunk(place, converted.color);
        debug_assert_eq!(pushed, chunk, "tile segments reference the wrong chunk");
        let triangles = self.frame.transparent.triangle_len();
        self.commit(
            GeometryKind::Transparent,
            Batch {
                kind: BatchKind::Tiled {
                    segments: to_u32(start)..to_u32(end),
                },
                clip,
                params: converted.params,
                triangles: triangles..triangles,
            },
        );
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_stroke(
        &mut self,
        state: &PaintState,
        place: Placement,
        path: &BezPath,
        brush: &Brush,
        stroke: &Stroke,
        scale: f64,
        textures: &impl TextureSource<ImageId>,
    ) -> bool {
        let Some(converted) = self.brushes.convert(
            brush,
            state.opacity,
            place.to_vertex,
            self.frame.chunks.len(),
            textures,
        ) else {
            return self.skip("stroke with an unavailable brush");
        };
        let min_half_width = self.options.min_feature_size / 2.0;
        // Scaling strokes are expanded in local space, so joins and caps follow the transform.
        let (flatten_transform, to_vertex, half_width, tolerance) = if state.scale_strokes {
            (
                Affine::IDENTITY,
                place.to_vertex,
                (stroke.width / 2.0).max(min_half_width / scale),
                self.options.tolerance / scale,
            )
        } else {
            (
                place.to_vertex,
                Affine::IDENTITY,
                (stroke.width / 2.0).max(min_half_width),
                self.options.tolerance,
            )
        };
        self.flattener.clear();
        if is_dash_pattern(&stroke.dash_pattern) {
            let dashed = dash_path(
                path,
                flatten_transform,
                stroke.dash_offset,
                &stroke.dash_pattern,
            );
            self.flattener.flatten(&dashed, Affine::IDENTITY, tolerance);
        } else {
            self.flattener.flatten(path, flatten_transform, tolerance);
        }
        self.expander.clear();
        let pen = Pen {
            style: stroke,
            half_width,
            tolerance,
            outline: state.antialias,
        };
        for contour in self.flattener.contours() {
            self.expander
                .expand(self.flattener.contour_points(contour), contour.closed, &pen);
        }
        if self.expander.is_empty() {
            return self.skip("stroke without geometry");
        }
        let clip = to_vertex
            .transform_rect_bbox(self.expander.bounds())
            .intersect(place.clip)
            .expand();
        if rect_is_empty(&clip) {
            return self.skip("stroke outside the clip");
        }

        let chunk = self.push_chunk(place, converted.color);
        let kind = if converted.opaque {
            GeometryKind::Opaque
        } else {
            GeometryKind::Transparent
        };
        let geometry = self.frame.geometry_mut(kind);
        let start = geometry.triangle_len();
        let base = to_u32(geometry.positions.len());
        for &p in &self.expander.positions {
            geometry.push_vertex(point_to_f32(to_vertex * p), chunk);
        }
        geometry
            .triangles
            .extend(self.expander.triangles.iter().map(|t| t.map(|v| v + base)));
        let batch_kind = if !converted.opaque && self.expander.may_overlap() {
            BatchKind::TwoPass {
                stenciling: Stenciling::JustCover,
                covers: push_cover(geometry, clip, place.clip, chunk),
            }
        } else {
            BatchKind::Simple
        };
        let batch = Batch {
            kind: batch_kind,
            clip,
            params: converted.params,
            triangles: start..geometry.triangle_len(),
        };
        if state.antialias {
            let mut outline: SmallVec<[[f32; 2]; 32]> = SmallVec::new();
            for range in &self.expander.outline_loops {
                outline.clear();
                outline.extend(
                    self.expander.outline[range.clone()]
                        .iter()
                        .map(|&p| point_to_f32(to_vertex * p)),
                );
                self.frame
                    .gpaa
                    .append_polyline(&outline, true, chunk, place.layer);
            }
        }
        self.commit(kind, batch);
        true
    }

    /// Draw the image `image` stretched over `dst`, in local space.
    pub fn draw_image(
        &mut self,
        state: &PaintState,
        textures: &impl TextureSource<ImageId>,
        image: ImageId,
        dst: Rect,
    ) -> bool {
        self.assert_recording();
        let view = textures.lookup(&image);
        if view.is_empty() {
            return self.skip("image that isn't resident");
        }
        if rect_is_empty(&dst) || !self.brushes.has_capacity(self.frame.chunks.len()) {
            return self.skip("empty image");
        }
        let place = self.placement(state);
        let mut dst = dst;
        let mut uv = view.uv_rect();
        let [_, b, c, _, _, _] = place.to_vertex.as_coeffs();
        if b == 0.0 && c == 0.0 {
            // Axis aligned: clip the quad itself, so no fragment is wasted outside the clip.
            if place.to_vertex.determinant().abs() < MIN_SCALE {
                return self.skip("image under a degenerate transform");
            }
            let local_clip = place.to_vertex.inverse().transform_rect_bbox(place.clip);
            let visible = dst.intersect(local_clip);
            if rect_is_empty(&visible) {
                return self.skip("image outside the clip");
            }
            uv = sub_uv(uv, dst, visible);
            dst = visible;
        }
        let clip = place
            .to_vertex
            .transform_rect_bbox(dst)
            .intersect(place.clip)
            .expand();
        if rect_is_empty(&clip) {
            return self.skip("image outside the clip");
        }
        let chunk = self.push_chunk(place, [state.opacity; 4]);
        let geometry = &mut self.frame.transparent;
        let start = geometry.triangle_len();
        push_textured_quad(geometry, place.to_vertex, dst, uv, chunk);
        let batch = Batch {
            kind: BatchKind::Simple,
            clip,
            params: ShaderParams::Image {
                texture: view.texture,
            },
            triangles: start..geometry.triangle_len(),
        };
        self.commit(GeometryKind::Transparent, batch);
        true
    }

    /// Draw `image` as a nine-patch over `dst`: the corners keep their size, the edges stretch
    /// along one axis and the center along both.
    pub fn draw_nine_patch(
        &mut self,
        state: &PaintState,
        textures: &impl TextureSource<ImageId>,
        image: ImageId,
        dst: Rect,
        insets: Insets,
    ) -> bool {
        self.assert_recording();
        let view = textures.lookup(&image);
        if view.is_empty() {
            return self.skip("nine-patch image that isn't resident");
        }
        if rect_is_empty(&dst) || !self.brushes.has_capacity(self.frame.chunks.len()) {
            return self.skip("empty nine-patch");
        }
        let place = self.placement(state);
        let clip = place
            .to_vertex
            .transform_rect_bbox(dst)
            .intersect(place.clip)
            .expand();
        if rect_is_empty(&clip) {
            return self.skip("nine-patch outside the clip");
        }

        let [u0, v0, u1, v1] = view.uv_rect().map(f64::from);
        let (src_left, src_right) = fit_insets(insets.left, insets.right, u1 - u0);
        let (src_top, src_bottom) = fit_insets(insets.top, insets.bottom, v1 - v0);
        let (left, right) = fit_insets(insets.left, insets.right, dst.width());
        let (top, bottom) = fit_insets(insets.top, insets.bottom, dst.height());
        let xs = [dst.x0, dst.x0 + left, dst.x1 - right, dst.x1];
        let ys = [dst.y0, dst.y0 + top, dst.y1 - bottom, dst.y1];
        let us = [u0, u0 + src_left, u1 - src_right, u1];
        let vs = [v0, v0 + src_top, v1 - src_bottom, v1];

        let chunk = self.push_chunk(place, [state.opacity; 4]);
        let geometry = &mut self.frame.transparent;
        let start = geometry.triangle_len();
        let mut grid = [[0_u32; 4]; 4];
        for (row, (&y, &v)) in ys.iter().zip(&vs).enumerate() {
            for (col, (&x, &u)) in xs.iter().zip(&us).enumerate() {
                let p = place.to_vertex * Point::new(x, y);
                let uv = [u as f32, v as f32];
                grid[row][col] = geometry.push_textured_vertex(point_to_f32(p), uv, chunk);
            }
        }
        for row in 0..3 {
            for col in 0..3 {
                let (a, b) = (grid[row][col], grid[row][col + 1]);
                let (c, d) = (grid[row + 1][col + 1], grid[row + 1][col]);
                geometry.triangles.push([a, b, c]);
                geometry.triangles.push([a, c, d]);
            }
        }
        let batch = Batch {
            kind: BatchKind::Simple,
            clip,
            params: ShaderParams::Image {
                texture: view.texture,
            },
            triangles: start..geometry.triangle_len(),
        };
        self.commit(GeometryKind::Transparent, batch);
        true
    }

    /// Draw a run of glyphs in `color`, returning the number of glyphs drawn.
    ///
    /// Glyphs missing from the cache are skipped. The others are batched per atlas page, in the
    /// order the pages are first seen.
    pub fn draw_text(
        &mut self,
        state: &PaintState,
        glyphs: &impl TextureSource<GlyphKey>,
        run: &GlyphRun<'_>,
        color: Color,
    ) -> usize {
        self.assert_recording();
        let Some(converted) = self
            .brushes
            .convert_solid(color, state.opacity, self.frame.chunks.len())
        else {
            self.skip("glyph run over chunk capacity");
            return 0;
        };
        let place = self.placement(state);
        let mut quads = std::mem::take(&mut self.glyph_quads);
        quads.clear();
        let mut pages: SmallVec<[TextureId; 4]> = SmallVec::new();
        for glyph in run.glyphs {
            let view = glyphs.lookup(&GlyphKey::new(run.font_id, glyph.id, run.font_size));
            if view.is_empty() {
                trace!("glyph {} of font {} isn't resident, skipping it", glyph.id, run.font_id);
                continue;
            }
            let origin = Point::new(
                f64::from(glyph.x + view.offset[0]),
                f64::from(glyph.y + view.offset[1]),
            );
            let size = (f64::from(view.size[0]), f64::from(view.size[1]));
            if !pages.contains(&view.texture) {
                pages.push(view.texture);
            }
            quads.push((view, Rect::from_origin_size(origin, size)));
        }

        let chunk = ChunkIndex::new(self.frame.chunks.len());
        let mut drawn = 0;
        for page in pages {
            let on_page = || quads.iter().filter(move |(view, _)| view.texture == page);
            let Some(bounds) = on_page()
                .map(|(_, rect)| place.to_vertex.transform_rect_bbox(*rect))
                .reduce(|a, b| a.union(b))
            else {
                continue;
            };
            let clip = bounds.intersect(place.clip).expand();
            if rect_is_empty(&clip) {
                continue;
            }
            let geometry = &mut self.frame.transparent;
            let start = geometry.triangle_len();
            for (view, rect) in on_page() {
                push_textured_quad(geometry, place.to_vertex, *rect, view.uv_rect(), chunk);
                drawn += 1;
            }
            let batch = Batch {
                kind: BatchKind::Simple,
                clip,
                params: ShaderParams::Glyph { texture: page },
                triangles: start..geometry.triangle_len(),
            };
            self.commit(GeometryKind::Transparent, batch);
        }
        self.glyph_quads = quads;
        if drawn == 0 {
            self.skip("glyph run without visible glyphs");
            return 0;
        }
        let pushed = self.push_chunk(place, converted.color);
        debug_assert_eq!(pushed, chunk, "glyph quads reference the wrong chunk");
        drawn
    }

    /// Open a layer clipped to `clip`, in the local space of `state`.
    ///
    /// Draws go into the layer until the matching [`Painter::compose_layer`]. `expand` outsets
    /// the layer's content bounds, for effects that sample beyond the drawn geometry.
    pub fn begin_layer(
        &mut self,
        state: &PaintState,
        clip: Rect,
        expand: f64,
        op: CompositeOp,
    ) -> LayerId {
        self.assert_recording();
        let global = state.transform.transform_rect_bbox(clip).intersect(state.clip);
        let id = self.layers.push(&mut self.frame, global, expand.max(0.0), op);
        self.open_set(id);
        id
    }

    /// Close the current layer and composite it into its parent.
    ///
    /// Panics if no layer is open.
    pub fn compose_layer(&mut self) {
        self.assert_recording();
        let (child, parent) = self.layers.pop();
        let parent_layer = &mut self.frame.layers[parent.index()];
        parent_layer.depth *= self.options.depth_decay;
        let depth = parent_layer.depth;
        let set = self.open_set(parent);
        self.frame.sets[set.index()].compose_target = child;
        let child_layer = &mut self.frame.layers[child.index()];
        child_layer.compose_set = Some(set);
        child_layer.compose_depth = depth;
    }

    /// Exclude the area of `path` from the draws that follow, until [`Painter::restore`].
    ///
    /// With `complement`, everything outside the path is excluded instead. The clip-out only
    /// writes depth: its depth is the layer's depth at the time of the restore, or at the end of
    /// the frame if it is never restored.
    pub fn clip_out(
        &mut self,
        state: &PaintState,
        path: &BezPath,
        fill_rule: Fill,
        complement: bool,
    ) -> Option<DepthTaskId> {
        self.assert_recording();
        if !self.brushes.has_capacity(self.frame.chunks.len()) {
            self.skip("clip-out over chunk capacity");
            return None;
        }
        let place = self.placement(state);
        let contours = self.flatten_fillable(path, place.to_vertex);
        if contours.is_empty() {
            self.skip("clip-out without area");
            return None;
        }
        let bounds = if complement {
            place.clip
        } else {
            union_bounds(&contours).intersect(place.clip)
        };
        let clip = bounds.expand();
        if rect_is_empty(&clip) {
            self.skip("clip-out outside the clip");
            return None;
        }

        let mut data = DataChunk::new(Transform::IDENTITY, place.clip, [0.0; 4]);
        data.depth = self.frame.layers[place.layer.index()].depth;
        let chunk = self.push_chunk_data(data);
        let geometry = &mut self.frame.opaque;
        let start = geometry.triangle_len();
        for contour in &contours {
            push_fan(geometry, self.flattener.polygon(contour), chunk);
        }
        let stenciling = match (fill_rule, complement) {
            (Fill::NonZero, false) => Stenciling::NonZero,
            (Fill::EvenOdd, false) => Stenciling::Odd,
            (Fill::NonZero, true) => Stenciling::Zero,
            (Fill::EvenOdd, true) => Stenciling::Even,
        };
        let covers = geometry.cover_len()..geometry.cover_len();
        let batch = Batch {
            kind: BatchKind::TwoPass { stenciling, covers },
            clip,
            params: ShaderParams::ClipOut,
            triangles: start..geometry.triangle_len(),
        };
        self.commit(GeometryKind::Opaque, batch);
        let id = DepthTaskId(to_u32(self.depth_tasks.len()));
        self.depth_tasks.push(DepthTask {
            chunk,
            layer: place.layer,
            resolved: false,
        });
        Some(id)
    }

    /// End a clip-out: draws after this are no longer excluded by it.
    ///
    /// Panics if `task` is unknown or already restored.
    pub fn restore(&mut self, task: DepthTaskId) {
        self.assert_recording();
        let Some(entry) = self.depth_tasks.get_mut(task.0 as usize) else {
            panic!("unknown depth task {task:?}");
        };
        assert!(!entry.resolved, "depth task {task:?} restored twice");
        self.frame.chunks[entry.chunk.index()].depth = self.frame.layers[entry.layer.index()].depth;
        entry.resolved = true;
    }

    fn assert_recording(&self) {
        assert!(self.recording, "draw call outside of begin/end");
    }

    fn skip(&mut self, what: &str) -> bool {
        trace!("skipping {what}");
        self.frame.stats.skipped += 1;
        false
    }

    fn placement(&self, state: &PaintState) -> Placement {
        let layer = self.layers.current();
        let origin = self.layers.origin(layer);
        let clip = state.clip.intersect(self.layers.global_clip(layer)) - origin;
        Placement {
            layer,
            to_vertex: state.transform.then_translate(-origin),
            clip,
        }
    }

    /// Flatten `path` into vertex space, keeping the contours that enclose an area.
    fn flatten_fillable(
        &mut self,
        path: &BezPath,
        to_vertex: Affine,
    ) -> SmallVec<[FlatContour; 4]> {
        self.flattener.clear();
        self.flattener.flatten(path, to_vertex, self.options.tolerance);
        self.flattener
            .contours()
            .iter()
            .filter(|contour| self.flattener.is_fillable(contour))
            .cloned()
            .collect()
    }

    /// Store the chunk of a committed draw, stepping the layer's depth.
    fn push_chunk(&mut self, place: Placement, color: [f32; 4]) -> ChunkIndex {
        let layer = &mut self.frame.layers[place.layer.index()];
        layer.depth *= self.options.depth_decay;
        let mut data = DataChunk::new(Transform::IDENTITY, place.clip, color);
        data.depth = layer.depth;
        self.push_chunk_data(data)
    }

    fn push_chunk_data(&mut self, data: DataChunk) -> ChunkIndex {
        let index = ChunkIndex::new(self.frame.chunks.len());
        self.frame.chunks.push(data);
        if let Some(set) = self.frame.sets.last_mut() {
            set.chunks.end = to_u32(self.frame.chunks.len());
        }
        self.frame.stats.draws += 1;
        index
    }

    fn open_set(&mut self, layer: LayerId) -> SetIndex {
        let index = SetIndex::new(self.frame.sets.len());
        self.frame.sets.push(Set::new(
            layer,
            to_u32(self.frame.opaque.batches.len()),
            to_u32(self.frame.transparent.batches.len()),
            to_u32(self.frame.chunks.len()),
        ));
        let sets = &mut self.frame.layers[layer.index()].sets;
        if sets.is_empty() {
            *sets = index.0..index.0 + 1;
        } else {
            sets.end = index.0 + 1;
        }
        index
    }

    /// Extend the tail batch of the current set with `batch`, or append it.
    fn commit(&mut self, kind: GeometryKind, batch: Batch) {
        let Some(set) = self.frame.sets.last_mut() else {
            unreachable!("a frame always has a root set");
        };
        let range: &mut Range<u32> = match kind {
            GeometryKind::Opaque => &mut set.opaque,
            GeometryKind::Transparent => &mut set.transparent,
        };
        let geometry = match kind {
            GeometryKind::Opaque => &mut self.frame.opaque,
            GeometryKind::Transparent => &mut self.frame.transparent,
        };
        if !range.is_empty() {
            if let Some(tail) = geometry.batches.last_mut() {
                if can_merge(tail, &batch, &geometry.covers) {
                    merge(tail, batch);
                    trace!("merged draw into batch {}", geometry.batches.len() - 1);
                    self.frame.stats.merges += 1;
                    return;
                }
            }
        }
        geometry.batches.push(batch);
        range.end = to_u32(geometry.batches.len());
    }
}

/// Whether `next` can extend `tail`, the last batch of the same set and geometry.
fn can_merge(tail: &Batch, next: &Batch, covers: &[Cover]) -> bool {
    if tail.params != next.params || tail.triangles.end != next.triangles.start {
        return false;
    }
    match (&tail.kind, &next.kind) {
        (BatchKind::Simple, BatchKind::Simple) => true,
        (
            BatchKind::TwoPass {
                stenciling: a,
                covers: tail_covers,
            },
            BatchKind::TwoPass {
                stenciling: b,
                covers: next_covers,
            },
        ) => {
            if a != b || tail_covers.end != next_covers.start {
                return false;
            }
            // Overlapping covers would resolve the stencil of both draws twice.
            if tail_covers.is_empty() {
                return !rects_overlap(&tail.clip, &next.clip);
            }
            covers[tail_covers.start as usize..tail_covers.end as usize]
                .iter()
                .all(|cover| !rects_overlap(&cover.rect, &next.clip))
        }
        (BatchKind::Tiled { segments: a }, BatchKind::Tiled { segments: b }) => a.end == b.start,
        _ => false,
    }
}

fn merge(tail: &mut Batch, next: Batch) {
    tail.triangles.end = next.triangles.end;
    tail.clip = tail.clip.union(next.clip);
    match (&mut tail.kind, next.kind) {
        (BatchKind::TwoPass { covers, .. }, BatchKind::TwoPass { covers: next, .. }) => {
            covers.end = next.end;
        }
        (BatchKind::Tiled { segments }, BatchKind::Tiled { segments: next }) => {
            segments.end = next.end;
        }
        _ => {}
    }
}

fn union_bounds(contours: &[FlatContour]) -> Rect {
    contours
        .iter()
        .map(|contour| contour.bounds)
        .reduce(|a, b| a.union(b))
        .unwrap_or(Rect::ZERO)
}

/// Triangulate a polygon as a fan around its first point.
///
/// Convex polygons are covered exactly once. Other polygons need the stencil pass to resolve
/// the winding.
fn push_fan(geometry: &mut Geometry, polygon: &[[f32; 2]], chunk: ChunkIndex) {
    if polygon.len() < 3 {
        return;
    }
    let base = to_u32(geometry.positions.len());
    for &p in polygon {
        geometry.push_vertex(p, chunk);
    }
    for i in 1..to_u32(polygon.len()) - 1 {
        geometry.triangles.push([base, base + i, base + i + 1]);
    }
}

fn push_cover(geometry: &mut Geometry, rect: Rect, clip: Rect, chunk: ChunkIndex) -> Range<u32> {
    let start = geometry.cover_len();
    geometry.covers.push(Cover { rect, clip, chunk });
    start..geometry.cover_len()
}

fn push_textured_quad(
    geometry: &mut Geometry,
    to_vertex: Affine,
    rect: Rect,
    uv: [f32; 4],
    chunk: ChunkIndex,
) {
    let corners = [
        (Point::new(rect.x0, rect.y0), [uv[0], uv[1]]),
        (Point::new(rect.x1, rect.y0), [uv[2], uv[1]]),
        (Point::new(rect.x1, rect.y1), [uv[2], uv[3]]),
        (Point::new(rect.x0, rect.y1), [uv[0], uv[3]]),
    ];
    let [a, b, c, d] = corners
        .map(|(p, uv)| geometry.push_textured_vertex(point_to_f32(to_vertex * p), uv, chunk));
    geometry.triangles.push([a, b, c]);
    geometry.triangles.push([a, c, d]);
}

/// The part of `uv` that maps to `visible`, when all of `uv` maps to `full`.
fn sub_uv(uv: [f32; 4], full: Rect, visible: Rect) -> [f32; 4] {
    let lerp = |a: f32, b: f32, t: f64| a + (b - a) * t as f32;
    let tx = |x: f64| (x - full.x0) / full.width();
    let ty = |y: f64| (y - full.y0) / full.height();
    [
        lerp(uv[0], uv[2], tx(visible.x0)),
        lerp(uv[1], uv[3], ty(visible.y0)),
        lerp(uv[0], uv[2], tx(visible.x1)),
        lerp(uv[1], uv[3], ty(visible.y1)),
    ]
}

/// Shrink a pair of insets proportionally so they fit in `extent`.
fn fit_insets(a: f64, b: f64, extent: f64) -> (f64, f64) {
    let (a, b) = (a.max(0.0), b.max(0.0));
    let sum = a + b;
    if sum > extent && sum > 0.0 {
        let k = extent.max(0.0) / sum;
        (a * k, b * k)
    } else {
        (a, b)
    }
}

/// Whether `transform` scales both axes by the same amount, allowing rotation and reflection.
fn is_uniform_scale(transform: &Affine) -> bool {
    let [a, b, c, d, _, _] = transform.as_coeffs();
    let x_len = a * a + b * b;
    let y_len = c * c + d * d;
    let tolerance = UNIFORM_EPSILON * x_len.max(y_len);
    (a * c + b * d).abs() <= tolerance && (x_len - y_len).abs() <= tolerance
}

/// Whether `dashes` describes a pattern with some length. Anything else strokes solid.
fn is_dash_pattern(dashes: &[f64]) -> bool {
    !dashes.is_empty()
        && dashes.iter().all(|d| d.is_finite() && *d >= 0.0)
        && dashes.iter().sum::<f64>() > 0.0
}

/// Split `path`, mapped through `transform`, into its dashes.
fn dash_path(path: &BezPath, transform: Affine, offset: f64, dashes: &[f64]) -> BezPath {
    let elements = path.elements().iter().map(move |el| transform * *el);
    kurbo::dash(elements, offset, dashes).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        can_merge, dash_path, fit_insets, is_dash_pattern, is_uniform_scale, sub_uv, PaintState,
        Painter,
    };
    use crate::atlas::{AtlasConfig, TextureCache};
    use crate::brush::Brush;
    use crate::PainterOptions;
    use peniko::color::palette::css::{BLUE, RED};
    use peniko::kurbo::{Affine, BezPath, PathEl, Rect};
    use peniko::Fill;
    use strata_encoding::{Batch, BatchKind, Cover, ChunkIndex, ShaderParams, Stenciling};

    fn painter() -> Painter {
        let mut painter = Painter::new(PainterOptions::default()).unwrap();
        painter.begin(64, 64).unwrap();
        painter
    }

    fn square(x: f64, y: f64, size: f64) -> BezPath {
        let mut path = BezPath::new();
        path.move_to((x, y));
        path.line_to((x + size, y));
        path.line_to((x + size, y + size));
        path.line_to((x, y + size));
        path.close_path();
        path
    }

    fn two_pass(
        stenciling: Stenciling,
        covers: std::ops::Range<u32>,
        clip: Rect,
        triangles: std::ops::Range<u32>,
    ) -> Batch {
        Batch {
            kind: BatchKind::TwoPass { stenciling, covers },
            clip,
            params: ShaderParams::Solid,
            triangles,
        }
    }

    #[test]
    fn uniform_scale_detection() {
        assert!(is_uniform_scale(&Affine::IDENTITY));
        assert!(is_uniform_scale(&Affine::rotate(0.7).then_scale(3.0)));
        assert!(is_uniform_scale(&Affine::FLIP_X));
        assert!(!is_uniform_scale(&Affine::scale_non_uniform(1.0, 2.0)));
        assert!(!is_uniform_scale(&Affine::skew(0.5, 0.0)));
    }

    #[test]
    fn degenerate_dash_patterns_stroke_solid() {
        assert!(is_dash_pattern(&[4.0, 2.0]));
        assert!(is_dash_pattern(&[0.0, 3.0]));
        assert!(!is_dash_pattern(&[]));
        assert!(!is_dash_pattern(&[0.0, 0.0]));
        assert!(!is_dash_pattern(&[4.0, -1.0]));
        assert!(!is_dash_pattern(&[f64::NAN, 2.0]));
    }

    #[test]
    fn dashed_path_splits_into_contours() {
        let mut path = BezPath::new();
        path.move_to((0.0, 0.0));
        path.line_to((10.0, 0.0));
        let dashed = dash_path(&path, Affine::translate((0.0, 5.0)), 0.0, &[2.0, 1.0]);
        let mut starts: Vec<_> = dashed
            .elements()
            .iter()
            .filter_map(|el| match el {
                PathEl::MoveTo(p) => Some(*p),
                _ => None,
            })
            .collect();
        starts.sort_by(|a, b| a.x.total_cmp(&b.x));
        assert_eq!(starts.len(), 4);
        for (p, x) in starts.iter().zip([0.0, 3.0, 6.0, 9.0]) {
            assert!((p.x - x).abs() < 1e-6 && (p.y - 5.0).abs() < 1e-9, "{p:?}");
        }
    }

    #[test]
    fn two_pass_merge_rejects_overlapping_covers() {
        let clip = Rect::new(0.0, 0.0, 10.0, 10.0);
        let covers = [Cover {
            rect: clip,
            clip,
            chunk: ChunkIndex(0),
        }];
        let tail = two_pass(Stenciling::NonZero, 0..1, clip, 0..4);
        let apart = two_pass(Stenciling::NonZero, 1..2, Rect::new(20.0, 0.0, 30.0, 10.0), 4..8);
        let overlapping =
            two_pass(Stenciling::NonZero, 1..2, Rect::new(5.0, 5.0, 15.0, 15.0), 4..8);
        let other_rule = two_pass(Stenciling::Odd, 1..2, Rect::new(20.0, 0.0, 30.0, 10.0), 4..8);
        assert!(can_merge(&tail, &apart, &covers));
        assert!(!can_merge(&tail, &overlapping, &covers));
        assert!(!can_merge(&tail, &other_rule, &covers));
        // Touching edges don't overlap.
        let touching = two_pass(Stenciling::NonZero, 1..2, Rect::new(10.0, 0.0, 20.0, 10.0), 4..8);
        assert!(can_merge(&tail, &touching, &covers));
    }

    #[test]
    fn merge_needs_contiguous_spans() {
        let simple = |triangles| Batch {
            kind: BatchKind::Simple,
            clip: Rect::ZERO,
            params: ShaderParams::Solid,
            triangles,
        };
        assert!(can_merge(&simple(0..2), &simple(2..3), &[]));
        assert!(!can_merge(&simple(0..2), &simple(3..4), &[]));
    }

    #[test]
    fn uv_follows_clipped_quad() {
        let uv = sub_uv(
            [0.0, 0.0, 16.0, 8.0],
            Rect::new(0.0, 0.0, 32.0, 16.0),
            Rect::new(16.0, 0.0, 32.0, 8.0),
        );
        assert_eq!(uv, [8.0, 0.0, 16.0, 4.0]);
    }

    #[test]
    fn insets_shrink_to_fit() {
        assert_eq!(fit_insets(4.0, 4.0, 20.0), (4.0, 4.0));
        assert_eq!(fit_insets(6.0, 2.0, 4.0), (3.0, 1.0));
    }

    #[test]
    fn depth_decreases_per_draw() {
        let mut painter = painter();
        let textures = TextureCache::new(AtlasConfig::default());
        let state = PaintState::default().with_antialias(false);
        let red = Brush::Solid(RED);
        let blue = Brush::Solid(BLUE);
        assert!(painter.fill_path(&state, &square(0.0, 0.0, 8.0), &red, Fill::NonZero, &textures));
        assert!(painter.fill_path(&state, &square(8.0, 0.0, 8.0), &blue, Fill::NonZero, &textures));
        let chunks = &painter.frame().chunks;
        assert_eq!(chunks[0].depth, 0.999);
        assert!(chunks[1].depth < chunks[0].depth);
    }

    #[test]
    fn restore_pins_clip_out_depth() {
        let mut painter = painter();
        let textures = TextureCache::new(AtlasConfig::default());
        let state = PaintState::default().with_antialias(false);
        let task = painter
            .clip_out(&state, &square(0.0, 0.0, 16.0), Fill::NonZero, false)
            .unwrap();
        let red = Brush::Solid(RED);
        painter.fill_path(&state, &square(0.0, 0.0, 32.0), &red, Fill::NonZero, &textures);
        painter.restore(task);
        let chunks = &painter.frame().chunks;
        assert_eq!(chunks[0].depth, chunks[1].depth);
        let output = painter.end();
        let clip_out = &output.frame.opaque.batches[0];
        assert_eq!(clip_out.params, ShaderParams::ClipOut);
        assert!(clip_out.covers().is_empty());
    }

    #[test]
    #[should_panic(expected = "restored twice")]
    fn double_restore_panics() {
        let mut painter = painter();
        let state = PaintState::default();
        let task = painter
            .clip_out(&state, &square(0.0, 0.0, 16.0), Fill::NonZero, true)
            .unwrap();
        painter.restore(task);
        painter.restore(task);
    }

    #[test]
    #[should_panic(expected = "outside of begin/end")]
    fn drawing_after_end_panics() {
        let mut painter = painter();
        painter.end();
        let textures = TextureCache::new(AtlasConfig::default());
        let state = PaintState::default();
        let red = Brush::Solid(RED);
        painter.fill_path(&state, &square(0.0, 0.0, 8.0), &red, Fill::NonZero, &textures);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut painter = Painter::new(PainterOptions::default()).unwrap();
        assert!(painter.begin(0, 10).is_err());
        assert!(painter.begin(1 << 20, 10).is_err());
    }

    #[test]
    fn frame_output_exposes_chunk_bytes() {
        let mut painter = painter();
        let textures = TextureCache::new(AtlasConfig::default());
        let state = PaintState::default();
        let red = Brush::Solid(RED);
        painter.fill_path(&state, &square(0.0, 0.0, 8.0), &red, Fill::NonZero, &textures);
        let output = painter.end();
        assert_eq!(output.chunk_bytes().len(), std::mem::size_of::<strata_encoding::DataChunk>());
    }
}
