// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed indices into the per-frame arenas.
//!
//! Every cross reference inside a [`Frame`](crate::Frame) is a plain `u32` on the GPU side.
//! On the CPU side they are wrapped so that a chunk index can't be used to look up a layer.
//! Indices are only ever produced by the compiler for the frame they belong to, so they are
//! checked with `debug_assert!` and trusted in release builds.

macro_rules! frame_index {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            /// Create an index from a position in an arena.
            ///
            /// Panics if `index` doesn't fit in a `u32`.
            #[inline]
            pub fn new(index: usize) -> Self {
                Self(u32::try_from(index).expect(concat!(stringify!($name), " overflowed u32")))
            }

            /// Return the index as a `usize`, for indexing the arena.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

frame_index!(
    /// Index of a [`DataChunk`](crate::DataChunk) in [`Frame::chunks`](crate::Frame::chunks).
    ChunkIndex
);

frame_index!(
    /// Index of a [`Layer`](crate::Layer) in [`Frame::layers`](crate::Frame::layers).
    LayerId
);

frame_index!(
    /// Index of a [`Set`](crate::Set) in [`Frame::sets`](crate::Frame::sets).
    SetIndex
);

frame_index!(
    /// Index of a [`Batch`](crate::Batch) in a geometry's batch array.
    BatchIndex
);

impl LayerId {
    /// The root layer, i.e. the frame target. It always exists.
    ///
    /// As a compose target it means "this set composes nothing".
    pub const ROOT: Self = Self(0);

    /// Returns `true` for the root layer.
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

/// Converts an arena length into the `u32` stored in spans and vertex attributes.
///
/// Panics if the frame grew past `u32::MAX` elements.
#[inline]
pub fn to_u32(len: usize) -> u32 {
    u32::try_from(len).expect("frame arena exceeded u32::MAX elements")
}

#[cfg(test)]
mod tests {
    use super::{LayerId, SetIndex};

    #[test]
    fn root_layer_is_zero() {
        assert!(LayerId::ROOT.is_root());
        assert!(!LayerId::new(3).is_root());
        assert_eq!(SetIndex::new(7).index(), 7);
    }
}
