// Copyright 2025 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Texture and glyph atlases.
//!
//! Images and glyph bitmaps are packed into atlas pages with [`guillotiere`]. The caches only
//! manage placement: uploading the pixels into a page is the renderer's job, driven by the
//! [`TextureView`] returned from [`AtlasCache::insert`].
//!
//! Entries live until the owner of the source resource calls [`AtlasCache::notify_destroyed`].
//! That reclaims the slot and runs every registered eviction listener, so dependent caches can
//! drop what they derived from the entry. There is no finalization based on drop order.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

use guillotiere::{size2, AllocId, AtlasAllocator};
use strata_encoding::TextureId;

use crate::{Error, Result};

/// Identifier of a source image, assigned by the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u64);

/// Identifier of a rasterized glyph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GlyphKey {
    pub font_id: u64,
    pub glyph_id: u32,
    /// The font size, as raw `f32` bits.
    pub size_bits: u32,
}

impl GlyphKey {
    pub fn new(font_id: u64, glyph_id: u32, size: f32) -> Self {
        Self {
            font_id,
            glyph_id,
            size_bits: size.to_bits(),
        }
    }
}

/// Where a cached bitmap lives.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TextureView {
    /// The atlas page.
    pub texture: TextureId,
    /// Placement in the page in texels, as `[x0, y0, x1, y1]`.
    pub atlas: [u32; 4],
    /// Size of the bitmap in pixels. Zero for an empty view.
    pub size: [u32; 2],
    /// Offset of the bitmap's top-left corner from its anchor, e.g. a glyph's pen position.
    pub offset: [f32; 2],
}

impl TextureView {
    /// The view returned on a cache miss.
    pub const EMPTY: Self = Self {
        texture: TextureId(0),
        atlas: [0; 4],
        size: [0; 2],
        offset: [0.0; 2],
    };

    pub fn is_empty(&self) -> bool {
        self.size[0] == 0 || self.size[1] == 0
    }

    /// Texel coordinates of the bitmap's corners, as `[u0, v0, u1, v1]`.
    pub fn uv_rect(&self) -> [f32; 4] {
        self.atlas.map(|c| c as f32)
    }
}

/// A synchronous lookup of cached bitmaps.
///
/// A miss returns an empty view. Implementations never block to populate an entry.
pub trait TextureSource<K> {
    fn lookup(&self, key: &K) -> TextureView;
}

/// Configuration for atlas caches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AtlasConfig {
    /// Size of each page in texels.
    pub page_size: (u32, u32),
    /// Pages are created on demand up to this count.
    pub max_pages: usize,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            page_size: (1024, 1024),
            max_pages: 8,
        }
    }
}

/// Called with the key of every entry that is evicted.
pub type EvictionListener<K> = Box<dyn FnMut(&K) + Send>;

struct Page {
    id: TextureId,
    allocator: AtlasAllocator,
    count: u32,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Slot {
    page: usize,
    alloc: AllocId,
    view: TextureView,
}

/// A multi-page atlas keyed by `K`.
pub struct AtlasCache<K> {
    config: AtlasConfig,
    pages: Vec<Page>,
    slots: HashMap<K, Slot>,
    listeners: Vec<EvictionListener<K>>,
    /// Pages written since the last [`AtlasCache::update_mipmaps`].
    dirty: BTreeSet<TextureId>,
}

/// Cache of images, used by image draws and patterns.
pub type TextureCache = AtlasCache<ImageId>;

/// Cache of rasterized glyphs, used by text draws.
pub type GlyphCache = AtlasCache<GlyphKey>;

impl<K> fmt::Debug for AtlasCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtlasCache")
            .field("config", &self.config)
            .field("pages", &self.pages)
            .field("entries", &self.slots.len())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl<K: Eq + Hash + Clone> AtlasCache<K> {
    pub fn new(config: AtlasConfig) -> Self {
        Self {
            config,
            pages: Vec::new(),
            slots: HashMap::new(),
            listeners: Vec::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    /// Reserve space for a `width` x `height` bitmap under `key`.
    ///
    /// An existing entry for `key` is replaced without notifying listeners. Zero-sized bitmaps
    /// are not stored and yield an empty view.
    pub fn insert(&mut self, key: K, width: u32, height: u32) -> Result<TextureView> {
        self.insert_with_offset(key, width, height, [0.0; 2])
    }

    /// Like [`AtlasCache::insert`], with an anchor offset such as a glyph's bearing.
    pub fn insert_with_offset(
        &mut self,
        key: K,
        width: u32,
        height: u32,
        offset: [f32; 2],
    ) -> Result<TextureView> {
        let (page_w, page_h) = self.config.page_size;
        if width > page_w || height > page_h {
            return Err(Error::ImageTooLarge { width, height });
        }
        if let Some(old) = self.slots.remove(&key) {
            self.release(&old);
        }
        if width == 0 || height == 0 {
            return Ok(TextureView::EMPTY);
        }
        let (page, alloc) = self.allocate(width, height)?;
        let min = alloc.rectangle.min;
        let (x0, y0) = (min.x as u32, min.y as u32);
        let view = TextureView {
            texture: self.pages[page].id,
            atlas: [x0, y0, x0 + width, y0 + height],
            size: [width, height],
            offset,
        };
        self.dirty.insert(view.texture);
        self.slots.insert(
            key,
            Slot {
                page,
                alloc: alloc.id,
                view,
            },
        );
        Ok(view)
    }

    /// First fit over the existing pages, then a new page if the limit allows.
    fn allocate(&mut self, width: u32, height: u32) -> Result<(usize, guillotiere::Allocation)> {
        let size = size2(width as i32, height as i32);
        for (index, page) in self.pages.iter_mut().enumerate() {
            if let Some(alloc) = page.allocator.allocate(size) {
                page.count += 1;
                return Ok((index, alloc));
            }
        }
        if self.pages.len() >= self.config.max_pages {
            return Err(Error::AtlasFull);
        }
        let (page_w, page_h) = self.config.page_size;
        let mut page = Page {
            id: TextureId(self.pages.len() as u32),
            allocator: AtlasAllocator::new(size2(page_w as i32, page_h as i32)),
            count: 0,
        };
        let alloc = page.allocator.allocate(size).ok_or(Error::AtlasFull)?;
        page.count += 1;
        self.pages.push(page);
        Ok((self.pages.len() - 1, alloc))
    }

    fn release(&mut self, slot: &Slot) {
        let page = &mut self.pages[slot.page];
        page.allocator.deallocate(slot.alloc);
        page.count = page.count.saturating_sub(1);
    }

    /// Register a listener that runs whenever an entry is evicted.
    pub fn on_evict(&mut self, listener: impl FnMut(&K) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// The source resource for `key` was destroyed: reclaim its slot and notify listeners.
    ///
    /// Returns `false` if there was no entry.
    pub fn notify_destroyed(&mut self, key: &K) -> bool {
        let Some(slot) = self.slots.remove(key) else {
            return false;
        };
        self.release(&slot);
        for listener in &mut self.listeners {
            listener(key);
        }
        true
    }

    /// Evict every entry, notifying listeners for each.
    pub fn clear(&mut self) {
        let keys: Vec<K> = self.slots.keys().cloned().collect();
        for key in keys {
            self.notify_destroyed(&key);
        }
    }

    /// Pages written since the last call, in id order.
    ///
    /// The renderer calls this once per frame before composing and regenerates the mipmaps of
    /// the returned pages.
    pub fn update_mipmaps(&mut self) -> Vec<TextureId> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// Look up `key`, returning `None` on a miss.
    pub fn get(&self, key: &K) -> Option<TextureView> {
        self.slots.get(key).map(|slot| slot.view)
    }

    /// Look up `key`, reserving a `width` x `height` slot on a miss.
    pub fn get_or_insert(&mut self, key: K, width: u32, height: u32) -> Result<TextureView> {
        if let Some(view) = self.get(&key) {
            return Ok(view);
        }
        self.insert(key, width, height)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl<K: Eq + Hash + Clone> TextureSource<K> for AtlasCache<K> {
    fn lookup(&self, key: &K) -> TextureView {
        self.get(key).unwrap_or(TextureView::EMPTY)
    }
}
