// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::HashMap;

use peniko::color::cache_key::CacheKey;
use peniko::color::{HueDirection, Srgb};
use peniko::{ColorStop, ColorStops};

/// Samples per ramp row.
pub(crate) const N_SAMPLES: usize = 512;

/// The color-stop atlas of a frame: one row of premultiplied RGBA8 samples per gradient.
#[derive(Copy, Clone, Debug, Default)]
pub struct Ramps<'a> {
    pub data: &'a [u32],
    pub width: u32,
    pub height: u32,
}

impl Ramps<'_> {
    /// The samples of one row.
    pub fn row(&self, row: u32) -> &[u32] {
        let start = row as usize * self.width as usize;
        &self.data[start..start + self.width as usize]
    }
}

/// Builds the color-stop atlas for one frame.
///
/// Rows are appended in first-use order and identical stop lists share a row. The atlas is
/// cleared with [`RampCache::reset`] at the start of every frame, so row indices are only
/// meaningful within the frame that produced them.
#[derive(Debug, Default)]
pub struct RampCache {
    map: HashMap<CacheKey<ColorStops>, u32>,
    data: Vec<u32>,
}

impl RampCache {
    pub fn reset(&mut self) {
        self.map.clear();
        self.data.clear();
    }

    /// Returns the row holding `stops`, adding it if needed.
    ///
    /// `stops` must not be empty.
    pub fn add(&mut self, stops: &[ColorStop]) -> u32 {
        debug_assert!(!stops.is_empty(), "a ramp needs at least one stop");
        let key = CacheKey(ColorStops::from(stops));
        if let Some(&row) = self.map.get(&key) {
            return row;
        }
        let row = (self.data.len() / N_SAMPLES) as u32;
        self.data.extend(make_ramp(stops));
        self.map.insert(key, row);
        row
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn ramps(&self) -> Ramps<'_> {
        Ramps {
            data: &self.data,
            width: N_SAMPLES as u32,
            height: (self.data.len() / N_SAMPLES) as u32,
        }
    }
}

fn make_ramp(stops: &[ColorStop]) -> impl Iterator<Item = u32> + '_ {
    let mut last_u = 0.0;
    let mut last_c = stops[0].color.to_alpha_color::<Srgb>();
    let mut this_u = last_u;
    let mut this_c = last_c;
    let mut j = 0;
    (0..N_SAMPLES).map(move |i| {
        let u = (i as f32) / (N_SAMPLES - 1) as f32;
        while u > this_u {
            last_u = this_u;
            last_c = this_c;
            if let Some(s) = stops.get(j + 1) {
                this_u = s.offset;
                this_c = s.color.to_alpha_color::<Srgb>();
                j += 1;
            } else {
                break;
            }
        }
        let du = this_u - last_u;
        let c = if du < 1e-9 {
            this_c
        } else {
            last_c.lerp(this_c, (u - last_u) / du, HueDirection::default())
        };
        c.premultiply().to_rgba8().to_u32()
    })
}
