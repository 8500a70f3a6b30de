// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame data model shared between the Strata batch compiler and GPU renderers.
//!
//! A [`Frame`] is the in-process contract between CPU batching and GPU submission: two
//! [`Geometry`] stores (opaque and transparent) with their batches and covers, the
//! [`DataChunk`] array those reference, packed tile-stroke segments, silhouette lines for
//! antialiasing, and the layer and set arrays that form the skeleton of the draw list.

#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
#![allow(missing_docs)]

mod chunk;
mod frame;
mod geometry;
mod gpaa;
mod index;
mod layer;
pub mod math;
mod tile;

pub use chunk::DataChunk;
pub use frame::{DrawCommand, Frame, FrameStats, GeometryKind};
pub use geometry::{
    Batch, BatchKind, Cover, Geometry, PaintKind, ShaderParams, Stenciling, TextureId,
};
pub use gpaa::Gpaa;
pub use index::{to_u32, BatchIndex, ChunkIndex, LayerId, SetIndex};
pub use layer::{CompositeOp, Layer, LayerState, Set};
pub use math::Transform;
pub use tile::{TileCap, TileSegment, TileStrokes, TILE_SEGMENT_REACH, TILE_SIZE};
