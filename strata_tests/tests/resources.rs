// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata::kurbo::{Affine, Rect};
use strata::peniko::color::palette::css::{BLACK, WHITE};
use strata::peniko::Extend;
use strata::peniko::Fill;
use strata::{
    AtlasConfig, Brush, Glyph, GlyphCache, GlyphKey, GlyphRun, ImageId, Insets, PaintKind,
    Pattern, ShaderParams, TextureId, TextureSource,
};
use strata_tests::{aliased, rect, Harness};

const FONT: u64 = 3;
const SIZE: f32 = 12.0;

fn glyph(id: u32, x: f32) -> Glyph {
    Glyph { id, x, y: 20.0 }
}

#[test]
fn missing_image_is_skipped() {
    let mut h = Harness::new(64, 64);
    let dst = Rect::new(0.0, 0.0, 16.0, 16.0);
    assert!(!h.painter.draw_image(&aliased(), &h.textures, ImageId(1), dst));
    let output = h.painter.end();
    assert!(output.frame.transparent.batches.is_empty());
    assert_eq!(output.frame.stats.skipped, 1);
}

#[test]
fn image_is_a_textured_quad() {
    let mut h = Harness::new(64, 64);
    let view = h.textures.insert(ImageId(1), 16, 16).unwrap();
    let dst = Rect::new(0.0, 0.0, 32.0, 32.0);
    assert!(h.painter.draw_image(&aliased(), &h.textures, ImageId(1), dst));
    let output = h.painter.end();
    let frame = output.frame;
    let batch = &frame.transparent.batches[0];
    assert_eq!(batch.params, ShaderParams::Image { texture: view.texture });
    assert_eq!(batch.triangle_count(), 2);
    assert_eq!(frame.transparent.tex_positions.len(), 4);
    assert!(frame.transparent.positions.is_empty());
    assert_eq!(frame.chunks[0].color, [1.0; 4]);
}

#[test]
fn axis_aligned_image_is_clipped_with_its_uvs() {
    let mut h = Harness::new(64, 64);
    let view = h.textures.insert(ImageId(1), 16, 16).unwrap();
    let state = aliased().with_clip(Rect::new(0.0, 0.0, 16.0, 64.0));
    assert!(h
        .painter
        .draw_image(&state, &h.textures, ImageId(1), Rect::new(0.0, 0.0, 32.0, 32.0)));
    let output = h.painter.end();
    let geometry = &output.frame.transparent;
    let max_x = geometry.tex_positions.iter().map(|p| p[0]).fold(0.0, f32::max);
    assert_eq!(max_x, 16.0);
    let [u0, _, u1, _] = view.uv_rect();
    let us: Vec<f32> = geometry.tex_uvs.iter().map(|uv| uv[0]).collect();
    assert!(us.contains(&u0));
    assert!(us.contains(&((u0 + u1) / 2.0)));
    assert!(!us.contains(&u1));
}

#[test]
fn consecutive_images_on_a_page_share_a_batch() {
    let mut h = Harness::new(64, 64);
    h.textures.insert(ImageId(1), 8, 8).unwrap();
    h.textures.insert(ImageId(2), 8, 8).unwrap();
    let state = aliased();
    assert!(h
        .painter
        .draw_image(&state, &h.textures, ImageId(1), Rect::new(0.0, 0.0, 8.0, 8.0)));
    assert!(h
        .painter
        .draw_image(&state, &h.textures, ImageId(2), Rect::new(8.0, 0.0, 16.0, 8.0)));
    let output = h.painter.end();
    assert_eq!(output.frame.transparent.batches.len(), 1);
    assert_eq!(output.frame.transparent.batches[0].triangle_count(), 4);
}

#[test]
fn nine_patch_is_sixteen_vertices() {
    let mut h = Harness::new(64, 64);
    h.textures.insert(ImageId(9), 12, 12).unwrap();
    let dst = Rect::new(4.0, 4.0, 60.0, 30.0);
    assert!(h
        .painter
        .draw_nine_patch(&aliased(), &h.textures, ImageId(9), dst, Insets::uniform(4.0)));
    let output = h.painter.end();
    let geometry = &output.frame.transparent;
    assert_eq!(geometry.tex_positions.len(), 16);
    assert_eq!(geometry.triangles.len(), 18);
    assert_eq!(geometry.batches[0].triangle_count(), 18);
    // The corners keep their size.
    assert_eq!(geometry.tex_positions[1], [8.0, 4.0]);
    assert_eq!(geometry.tex_positions[2], [56.0, 4.0]);
}

#[test]
fn pattern_fill_needs_a_resident_image() {
    let mut h = Harness::new(64, 64);
    let brush = Brush::Pattern(Pattern {
        image: ImageId(4),
        transform: Affine::IDENTITY,
        extend: Extend::Repeat,
    });
    let path = rect(Rect::new(0.0, 0.0, 32.0, 32.0));
    assert!(!h.painter.fill_path(&aliased(), &path, &brush, Fill::NonZero, &h.textures));
    h.textures.insert(ImageId(4), 8, 8).unwrap();
    assert!(h.painter.fill_path(&aliased(), &path, &brush, Fill::NonZero, &h.textures));
    let output = h.painter.end();
    assert_eq!(
        output.frame.transparent.batches[0].params.kind(),
        PaintKind::Pattern
    );
}

fn two_page_glyphs() -> GlyphCache {
    let mut glyphs = GlyphCache::new(AtlasConfig {
        page_size: (16, 16),
        max_pages: 4,
    });
    // Each glyph fills a page.
    glyphs.insert(GlyphKey::new(FONT, 1, SIZE), 16, 16).unwrap();
    glyphs.insert(GlyphKey::new(FONT, 2, SIZE), 16, 16).unwrap();
    glyphs
}

#[test]
fn text_is_batched_per_page() {
    let mut h = Harness::new(128, 64);
    h.glyphs = two_page_glyphs();
    let glyphs = [glyph(2, 0.0), glyph(1, 16.0), glyph(7, 32.0), glyph(2, 48.0)];
    let run = GlyphRun {
        font_id: FONT,
        font_size: SIZE,
        glyphs: &glyphs,
    };
    let drawn = h.painter.draw_text(&aliased(), &h.glyphs, &run, BLACK);
    assert_eq!(drawn, 3);
    let output = h.painter.end();
    let frame = output.frame;
    let pages: Vec<_> = frame
        .transparent
        .batches
        .iter()
        .map(|batch| batch.params.texture())
        .collect();
    // Pages in first-seen order: glyph 2 lives on the second page.
    assert_eq!(pages, [Some(TextureId(1)), Some(TextureId(0))]);
    assert_eq!(frame.transparent.batches[0].triangle_count(), 4);
    assert_eq!(frame.transparent.batches[1].triangle_count(), 2);
    // One chunk for the whole run.
    assert_eq!(frame.chunks.len(), 1);
}

#[test]
fn text_extends_a_glyph_batch_on_the_same_page() {
    let mut h = Harness::new(128, 64);
    h.glyphs = two_page_glyphs();
    let first = [glyph(1, 0.0)];
    let second = [glyph(1, 32.0)];
    for glyphs in [&first[..], &second[..]] {
        let run = GlyphRun {
            font_id: FONT,
            font_size: SIZE,
            glyphs,
        };
        assert_eq!(h.painter.draw_text(&aliased(), &h.glyphs, &run, WHITE), 1);
    }
    let output = h.painter.end();
    assert_eq!(output.frame.transparent.batches.len(), 1);
    assert_eq!(output.frame.chunks.len(), 2);
}

#[test]
fn run_without_resident_glyphs_draws_nothing() {
    let mut h = Harness::new(64, 64);
    let glyphs = [glyph(1, 0.0)];
    let run = GlyphRun {
        font_id: FONT,
        font_size: SIZE,
        glyphs: &glyphs,
    };
    assert_eq!(h.painter.draw_text(&aliased(), &h.glyphs, &run, BLACK), 0);
    let output = h.painter.end();
    assert!(output.frame.chunks.is_empty());
    assert_eq!(output.frame.stats.skipped, 1);
}

#[test]
fn destroyed_images_are_evicted() {
    let evicted = Arc::new(AtomicUsize::new(0));
    let mut h = Harness::new(64, 64);
    let counter = evicted.clone();
    h.textures.on_evict(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    h.textures.insert(ImageId(5), 8, 8).unwrap();
    assert!(h.textures.notify_destroyed(&ImageId(5)));
    assert!(!h.textures.notify_destroyed(&ImageId(5)));
    assert_eq!(evicted.load(Ordering::Relaxed), 1);
    assert!(h.textures.lookup(&ImageId(5)).is_empty());
    assert!(!h
        .painter
        .draw_image(&aliased(), &h.textures, ImageId(5), Rect::new(0.0, 0.0, 8.0, 8.0)));
}
