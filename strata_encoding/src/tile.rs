// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Packed primitives for the thin-stroke tile shader.

use bytemuck::{Pod, Zeroable};

/// Width and height of a stroke tile, in pixels.
pub const TILE_SIZE: u32 = 8;

/// Endpoints are stored relative to the tile origin, offset by this margin so that segments
/// clipped against the inflated tile rect still fit in a byte.
const ENDPOINT_MARGIN: f32 = 4.0;

/// Quantization steps per pixel of an endpoint coordinate.
const ENDPOINT_SCALE: f32 = 16.0;

/// How far outside its tile a segment endpoint can lie and still be packed exactly.
pub const TILE_SEGMENT_REACH: f32 = 255.0 / ENDPOINT_SCALE - ENDPOINT_MARGIN - TILE_SIZE as f32;

/// Line cap as encoded in [`TileSegment::style`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TileCap {
    Butt = 0,
    Square = 1,
    Round = 2,
}

/// One stroke segment clipped to one tile.
///
/// # Note
///
/// The layout is read directly by the tile shader:
/// - `tile`: tile x in the low 16 bits, tile y in the high 16 bits.
/// - `endpoints`: `x0, y0, x1, y1`, one byte each from the lowest, in 1/16 px relative to the
///   tile origin minus 4 px.
/// - `style`: half the stroke width in 1/256 px in the low 16 bits, [`TileCap`] above.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct TileSegment {
    pub tile: u32,
    pub endpoints: u32,
    pub style: u32,
}

fn quantize(v: f32) -> u32 {
    ((v + ENDPOINT_MARGIN) * ENDPOINT_SCALE)
        .round()
        .clamp(0.0, 255.0) as u32
}

fn dequantize(q: u32) -> f32 {
    (q & 0xff) as f32 / ENDPOINT_SCALE - ENDPOINT_MARGIN
}

impl TileSegment {
    /// Packs a segment with tile-relative endpoints.
    pub fn new(
        tile_x: u16,
        tile_y: u16,
        p0: [f32; 2],
        p1: [f32; 2],
        half_width: f32,
        cap: TileCap,
    ) -> Self {
        let endpoints =
            quantize(p0[0]) | quantize(p0[1]) << 8 | quantize(p1[0]) << 16 | quantize(p1[1]) << 24;
        let width = (half_width * 256.0).round().clamp(0.0, u16::MAX as f32) as u32;
        Self {
            tile: tile_x as u32 | (tile_y as u32) << 16,
            endpoints,
            style: width | (cap as u32) << 16,
        }
    }

    pub fn tile_x(&self) -> u16 {
        (self.tile & 0xffff) as u16
    }

    pub fn tile_y(&self) -> u16 {
        (self.tile >> 16) as u16
    }

    /// The endpoints relative to the tile origin, after quantization.
    pub fn endpoints(&self) -> [[f32; 2]; 2] {
        let e = self.endpoints;
        [
            [dequantize(e), dequantize(e >> 8)],
            [dequantize(e >> 16), dequantize(e >> 24)],
        ]
    }

    pub fn half_width(&self) -> f32 {
        (self.style & 0xffff) as f32 / 256.0
    }

    pub fn cap(&self) -> TileCap {
        match self.style >> 16 {
            1 => TileCap::Square,
            2 => TileCap::Round,
            _ => TileCap::Butt,
        }
    }
}

/// Tile segments for a frame, with the chunk each segment is drawn with.
#[derive(Clone, Debug, Default)]
pub struct TileStrokes {
    pub segments: Vec<TileSegment>,
    pub data_indices: Vec<u32>,
}

impl TileStrokes {
    pub fn reset(&mut self) {
        self.segments.clear();
        self.data_indices.clear();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{TileCap, TileSegment};

    #[test]
    fn packing_keeps_sixteenth_pixel_precision() {
        let seg = TileSegment::new(3, 70, [0.5, 7.25], [-1.0, 3.0625], 0.5, TileCap::Round);
        assert_eq!(seg.tile_x(), 3);
        assert_eq!(seg.tile_y(), 70);
        assert_eq!(seg.endpoints(), [[0.5, 7.25], [-1.0, 3.0625]]);
        assert_eq!(seg.half_width(), 0.5);
        assert_eq!(seg.cap(), TileCap::Round);
    }

    #[test]
    fn out_of_range_endpoints_saturate() {
        let seg = TileSegment::new(0, 0, [-10.0, 20.0], [0.0, 0.0], 1.0, TileCap::Butt);
        let [p0, _] = seg.endpoints();
        assert_eq!(p0[0], -4.0);
        assert_eq!(p0[1], 255.0 / 16.0 - 4.0);
    }
}
