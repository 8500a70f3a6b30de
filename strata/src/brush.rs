// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conversion of paints into shader parameters.

use log::trace;
use peniko::color::Srgb;
use peniko::kurbo::Affine;
use peniko::{Color, ColorStop, Extend, Gradient, GradientKind};
use strata_encoding::math::point_to_f32;
use strata_encoding::{ShaderParams, Transform};

use crate::atlas::{ImageId, TextureSource};
use crate::ramp_cache::RampCache;

/// Gradient extents below this, in device pixels, collapse to a solid color.
const DEGENERATE_EXTENT: f64 = 1e-3;

/// Sweeps narrower than this, in radians, collapse to a solid color.
const DEGENERATE_ANGLE: f32 = 1e-4;

/// An image repeated over the painted area.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub image: ImageId,
    /// Maps image pixels to the local space of the draw.
    pub transform: Affine,
    pub extend: Extend,
}

/// The paint of a fill or stroke.
#[derive(Clone, Debug, PartialEq)]
pub enum Brush {
    Solid(Color),
    Gradient(Gradient),
    Pattern(Pattern),
}

impl From<Color> for Brush {
    fn from(color: Color) -> Self {
        Self::Solid(color)
    }
}

impl From<Gradient> for Brush {
    fn from(gradient: Gradient) -> Self {
        Self::Gradient(gradient)
    }
}

/// A successfully converted brush.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Converted {
    pub params: ShaderParams,
    /// Premultiplied color stored in the draw's chunk.
    pub color: [f32; 4],
    /// Whether every covered pixel is written with full alpha.
    pub opaque: bool,
}

fn extend_to_u32(extend: Extend) -> u32 {
    match extend {
        Extend::Pad => 0,
        Extend::Repeat => 1,
        Extend::Reflect => 2,
    }
}

fn premultiplied(color: Color, opacity: f32) -> [f32; 4] {
    color.premultiply().components.map(|c| c * opacity)
}

fn solid(color: Color, opacity: f32) -> Converted {
    let color = premultiplied(color, opacity);
    Converted {
        params: ShaderParams::Solid,
        color,
        opaque: color[3] >= 1.0,
    }
}

fn stop_color(stop: &ColorStop) -> Color {
    stop.color.to_alpha_color::<Srgb>()
}

/// Maps brushes to shader parameters, registering gradient ramps on the way.
#[derive(Debug)]
pub struct BrushConverter {
    ramps: RampCache,
    max_chunks: u32,
}

impl BrushConverter {
    pub fn new(max_chunks: u32) -> Self {
        Self {
            ramps: RampCache::default(),
            max_chunks,
        }
    }

    pub fn ramps(&self) -> &RampCache {
        &self.ramps
    }

    /// Clear the color-stop atlas for a new frame.
    pub fn reset(&mut self) {
        self.ramps.reset();
    }

    /// Whether a frame holding `chunks` chunks can take another one.
    pub fn has_capacity(&self, chunks: usize) -> bool {
        if chunks >= self.max_chunks as usize {
            trace!("chunk capacity of {} reached, skipping draw", self.max_chunks);
            return false;
        }
        true
    }

    /// Convert a solid color, for draws that take a color instead of a brush.
    pub fn convert_solid(&self, color: Color, opacity: f32, chunks: usize) -> Option<Converted> {
        self.has_capacity(chunks).then(|| solid(color, opacity))
    }

    /// Convert `brush` for a draw whose local space maps to vertex space by `transform`.
    ///
    /// `chunks` is the number of chunks already in the frame. Returns `None` if the draw must be
    /// skipped: the chunk capacity is exhausted, a gradient has no stops, or a pattern's image
    /// isn't resident.
    pub fn convert(
        &mut self,
        brush: &Brush,
        opacity: f32,
        transform: Affine,
        chunks: usize,
        textures: &impl TextureSource<ImageId>,
    ) -> Option<Converted> {
        if !self.has_capacity(chunks) {
            return None;
        }
        match brush {
            Brush::Solid(color) => Some(solid(*color, opacity)),
            Brush::Gradient(gradient) => self.convert_gradient(gradient, opacity, transform),
            Brush::Pattern(pattern) => {
                let view = textures.lookup(&pattern.image);
                if view.is_empty() {
                    trace!("pattern image {:?} is not resident, skipping draw", pattern.image);
                    return None;
                }
                let image_to_vertex = transform * pattern.transform;
                if image_to_vertex.determinant().abs() < 1e-12 {
                    return None;
                }
                Some(Converted {
                    params: ShaderParams::Pattern {
                        texture: view.texture,
                        atlas_rect: view.uv_rect(),
                        vertex_to_image: Transform::from_kurbo(&image_to_vertex.inverse()),
                        extend: extend_to_u32(pattern.extend),
                    },
                    color: [opacity; 4],
                    opaque: false,
                })
            }
        }
    }

    fn convert_gradient(
        &mut self,
        gradient: &Gradient,
        opacity: f32,
        transform: Affine,
    ) -> Option<Converted> {
        let stops: &[ColorStop] = &gradient.stops;
        let last = match stops {
            [] => {
                trace!("gradient without stops, skipping draw");
                return None;
            }
            [only] => return Some(solid(stop_color(only), opacity)),
            [_, .., last] => last,
        };
        let degenerate = || Some(solid(stop_color(last), opacity));
        let scale = transform.determinant().abs().sqrt();
        if scale < DEGENERATE_EXTENT {
            return degenerate();
        }
        let extend = extend_to_u32(gradient.extend);
        let all_opaque = stops.iter().all(|s| stop_color(s).components[3] >= 1.0);
        let params = match gradient.kind {
            GradientKind::Linear { start, end } => {
                let (start, end) = (transform * start, transform * end);
                if start.distance(end) < DEGENERATE_EXTENT {
                    return degenerate();
                }
                let ramp = self.ramps.add(stops);
                ShaderParams::LinearGradient {
                    start: point_to_f32(start),
                    end: point_to_f32(end),
                    ramp,
                    extend,
                }
            }
            GradientKind::Radial {
                start_center,
                start_radius,
                end_center,
                end_radius,
            } => {
                let max_radius = start_radius.max(end_radius) as f64 * scale;
                if max_radius < DEGENERATE_EXTENT {
                    return degenerate();
                }
                let ramp = self.ramps.add(stops);
                ShaderParams::RadialGradient {
                    start_center: point_to_f32(transform * start_center),
                    start_radius: (start_radius as f64 * scale) as f32,
                    end_center: point_to_f32(transform * end_center),
                    end_radius: (end_radius as f64 * scale) as f32,
                    ramp,
                    extend,
                }
            }
            GradientKind::Sweep {
                center,
                start_angle,
                end_angle,
            } => {
                if (end_angle - start_angle).abs() < DEGENERATE_ANGLE {
                    return degenerate();
                }
                let [a, b, ..] = transform.as_coeffs();
                let rotation = b.atan2(a) as f32;
                let ramp = self.ramps.add(stops);
                ShaderParams::SweepGradient {
                    center: point_to_f32(transform * center),
                    start_angle: start_angle + rotation,
                    end_angle: end_angle + rotation,
                    ramp,
                    extend,
                }
            }
        };
        // Radial gradients leave pixels outside the cone between the circles untouched.
        let covers_all = !matches!(gradient.kind, GradientKind::Radial { .. });
        Some(Converted {
            params,
            color: [opacity; 4],
            opaque: all_opaque && opacity >= 1.0 && covers_all,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Brush, BrushConverter, Pattern};
    use crate::atlas::{AtlasConfig, ImageId, TextureCache};
    use peniko::color::palette::css::{BLUE, RED, TRANSPARENT};
    use peniko::kurbo::{Affine, Point};
    use peniko::{ColorStop, ColorStops, Extend, Gradient};
    use smallvec::smallvec;
    use strata_encoding::ShaderParams;

    fn textures() -> TextureCache {
        TextureCache::new(AtlasConfig::default())
    }

    fn two_stops() -> ColorStops {
        ColorStops(smallvec![ColorStop::from((0.0, RED)), ColorStop::from((1.0, BLUE))])
    }

    #[test]
    fn solid_premultiplies_with_opacity() {
        let mut converter = BrushConverter::new(16);
        let c = converter
            .convert(&Brush::Solid(RED), 0.5, Affine::IDENTITY, 0, &textures())
            .unwrap();
        assert_eq!(c.params, ShaderParams::Solid);
        assert_eq!(c.color, [0.5, 0.0, 0.0, 0.5]);
        assert!(!c.opaque);
        let c = converter
            .convert(&Brush::Solid(RED), 1.0, Affine::IDENTITY, 0, &textures())
            .unwrap();
        assert!(c.opaque);
        let c = converter
            .convert(&Brush::Solid(TRANSPARENT), 1.0, Affine::IDENTITY, 0, &textures())
            .unwrap();
        assert!(!c.opaque);
    }

    #[test]
    fn chunk_cap_fails_closed() {
        let mut converter = BrushConverter::new(4);
        assert!(converter
            .convert(&Brush::Solid(RED), 1.0, Affine::IDENTITY, 4, &textures())
            .is_none());
    }

    #[test]
    fn collapsed_linear_gradient_is_last_stop() {
        let mut converter = BrushConverter::new(16);
        let mut gradient = Gradient::new_linear((5.0, 5.0), (5.0, 5.0));
        gradient.stops = two_stops();
        let c = converter
            .convert(&Brush::Gradient(gradient.clone()), 1.0, Affine::IDENTITY, 0, &textures())
            .unwrap();
        let s = converter
            .convert(&Brush::Solid(BLUE), 1.0, Affine::IDENTITY, 0, &textures())
            .unwrap();
        assert_eq!(c, s);
        assert!(converter.ramps().is_empty());

        // A transform that collapses the gradient counts too.
        gradient.kind = peniko::GradientKind::Linear {
            start: Point::new(0.0, 0.0),
            end: Point::new(10.0, 0.0),
        };
        let squash = Affine::scale_non_uniform(1e-6, 1.0);
        let c = converter
            .convert(&Brush::Gradient(gradient), 1.0, squash, 0, &textures())
            .unwrap();
        assert_eq!(c.params, ShaderParams::Solid);
    }

    #[test]
    fn gradient_stop_counts() {
        let mut converter = BrushConverter::new(16);
        let gradient = Gradient::new_linear((0.0, 0.0), (10.0, 0.0));
        assert!(converter
            .convert(&Brush::Gradient(gradient.clone()), 1.0, Affine::IDENTITY, 0, &textures())
            .is_none());
        let mut one = gradient.clone();
        one.stops = ColorStops(smallvec![ColorStop::from((0.0, RED))]);
        let c = converter
            .convert(&Brush::Gradient(one), 1.0, Affine::IDENTITY, 0, &textures())
            .unwrap();
        assert_eq!(c.params, ShaderParams::Solid);
        let mut two = gradient;
        two.stops = two_stops();
        let c = converter
            .convert(&Brush::Gradient(two), 1.0, Affine::translate((3.0, 0.0)), 0, &textures())
            .unwrap();
        assert_eq!(
            c.params,
            ShaderParams::LinearGradient {
                start: [3.0, 0.0],
                end: [13.0, 0.0],
                ramp: 0,
                extend: 0,
            }
        );
        assert!(c.opaque);
        assert_eq!(converter.ramps().len(), 1);
    }

    #[test]
    fn pattern_needs_resident_image() {
        let mut converter = BrushConverter::new(16);
        let mut cache = textures();
        let pattern = Brush::Pattern(Pattern {
            image: ImageId(7),
            transform: Affine::IDENTITY,
            extend: Extend::Repeat,
        });
        assert!(converter
            .convert(&pattern, 1.0, Affine::IDENTITY, 0, &cache)
            .is_none());
        cache.insert(ImageId(7), 4, 4).unwrap();
        let c = converter
            .convert(&pattern, 1.0, Affine::IDENTITY, 0, &cache)
            .unwrap();
        assert!(matches!(c.params, ShaderParams::Pattern { extend: 1, .. }));
        assert!(!c.opaque);
    }
}
