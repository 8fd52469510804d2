//! FBO lifecycle and free-pool cache
//!
//! An [`Fbo`] is owned by exactly one place at a time: a pixmap binding, the
//! free pool, or nobody (destroyed). The type is deliberately not `Clone`, so
//! those moves are checked by the compiler.
//!
//! Released FBOs that own their texture go back into the pool stamped with
//! an expiry tick. Allocation looks in the pool first (same size and format),
//! and the block handler purges anything whose stamp has passed. Attached
//! FBOs are never visible to expiry.

use crate::config::FboCacheConfig;
use crate::gl::{FramebufferHandle, GlDispatch, TextureFormat, TextureHandle};
use crate::host::PixmapUsage;
use crate::screen::ScreenContext;
use bitflags::bitflags;
use log::{debug, info, trace};
use std::collections::{HashMap, VecDeque};

bitflags! {
    /// Options for wrapping an existing texture.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FboFlags: u32 {
        /// The FBO takes ownership of the texture: it is pooled and
        /// eventually deleted with the FBO. Without it the texture stays
        /// the caller's and is never deleted here.
        const ADOPT_TEXTURE = 1 << 0;
    }
}

/// A framebuffer with a texture color attachment.
#[derive(Debug, PartialEq, Eq)]
pub struct Fbo {
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Size the texture was allocated with. Pool buckets key on this, not on
    /// the geometry a screen pixmap resize writes into `width`/`height`.
    texture_size: (u32, u32),
    format: TextureFormat,
    texture: TextureHandle,
    framebuffer: FramebufferHandle,
    external: bool,
    /// Tick after which a pooled FBO may be purged.
    expire: u64,
}

impl Fbo {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texture_size(&self) -> (u32, u32) {
        self.texture_size
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    /// True when the texture belongs to someone else.
    pub fn is_external(&self) -> bool {
        self.external
    }
}

/// Lifetime counters for the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FboStats {
    /// FBOs built from a fresh or wrapped texture.
    pub created: u64,
    /// Allocations served from the pool.
    pub reused: u64,
    /// Calls to destroy (pooled or purged).
    pub destroyed: u64,
    /// FBOs whose GL objects were deleted.
    pub purged: u64,
    /// Subset of `purged` removed by expiry.
    pub expired: u64,
    /// Subset of `purged` pushed out of a full bucket.
    pub evicted: u64,
    /// FBOs currently sitting in the pool.
    pub pooled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    width: u32,
    height: u32,
    format: TextureFormat,
}

impl CacheKey {
    fn of(fbo: &Fbo) -> Self {
        let (width, height) = fbo.texture_size;
        Self {
            width,
            height,
            format: fbo.format,
        }
    }
}

/// Free FBOs grouped by size and format, newest at the front.
#[derive(Debug)]
pub struct FboPool {
    cache: HashMap<CacheKey, VecDeque<Fbo>>,
    config: FboCacheConfig,
    stats: FboStats,
}

impl FboPool {
    pub fn new(config: FboCacheConfig) -> Self {
        Self {
            cache: HashMap::new(),
            config,
            stats: FboStats::default(),
        }
    }

    pub fn stats(&self) -> &FboStats {
        &self.stats
    }

    pub fn pooled(&self) -> usize {
        self.stats.pooled
    }

    fn take(&mut self, key: CacheKey) -> Option<Fbo> {
        let queue = self.cache.get_mut(&key)?;
        let fbo = queue.pop_front()?;
        if queue.is_empty() {
            self.cache.remove(&key);
        }
        self.stats.pooled -= 1;
        self.stats.reused += 1;
        Some(fbo)
    }

    fn put(&mut self, gl: &dyn GlDispatch, tick: u64, mut fbo: Fbo) {
        if self.config.max_per_size == 0 {
            self.stats.evicted += 1;
            self.purge(gl, fbo);
            return;
        }
        fbo.expire = tick.saturating_add(self.config.expire_ticks);
        let queue = self.cache.entry(CacheKey::of(&fbo)).or_default();

        let mut evicted = None;
        if queue.len() >= self.config.max_per_size {
            evicted = queue.pop_back();
        }
        queue.push_front(fbo);

        match evicted {
            Some(old) => {
                self.stats.evicted += 1;
                self.purge(gl, old);
            }
            None => self.stats.pooled += 1,
        }
    }

    /// Deletes the GL objects behind an FBO. External textures survive.
    fn purge(&mut self, gl: &dyn GlDispatch, fbo: Fbo) {
        gl.delete_framebuffer(fbo.framebuffer);
        if !fbo.external {
            gl.delete_texture(fbo.texture);
        }
        self.stats.purged += 1;
    }

    /// Purges every pooled FBO whose stamp is older than `tick`.
    pub fn expire(&mut self, gl: &dyn GlDispatch, tick: u64) -> usize {
        let mut expired = Vec::new();
        for queue in self.cache.values_mut() {
            // Stamps grow toward the front, so stop at the first live one
            while queue.back().is_some_and(|fbo| tick > fbo.expire) {
                if let Some(fbo) = queue.pop_back() {
                    expired.push(fbo);
                }
            }
        }
        self.cache.retain(|_, queue| !queue.is_empty());

        let count = expired.len();
        for fbo in expired {
            self.purge(gl, fbo);
        }
        self.stats.pooled -= count;
        self.stats.expired += count as u64;
        count
    }

    /// Purges the whole pool.
    pub fn fini(&mut self, gl: &dyn GlDispatch) {
        let drained: Vec<Fbo> = self
            .cache
            .drain()
            .flat_map(|(_, queue)| queue.into_iter())
            .collect();
        let count = drained.len();
        for fbo in drained {
            self.purge(gl, fbo);
        }
        self.stats.pooled = 0;
        if count > 0 {
            info!("🗑️ Released {} pooled FBOs", count);
        }
    }
}

/// Whether a pixmap depth can be backed by a texture.
pub fn is_supported_depth(depth: u8) -> bool {
    TextureFormat::for_depth(depth).is_some()
}

impl ScreenContext {
    /// Whether a `width`×`height` surface fits the driver's FBO limit.
    pub fn fits_size_limit(&self, width: u32, height: u32) -> bool {
        let max = self.caps().max_fbo_size;
        width <= max && height <= max
    }

    /// Builds an FBO backed by a fresh texture, reusing a pooled one of the
    /// same size and format when available.
    pub fn create_fbo(
        &mut self,
        width: u32,
        height: u32,
        depth: u8,
        usage: PixmapUsage,
    ) -> Option<Fbo> {
        let format = TextureFormat::for_depth(depth)?;
        if width == 0 || height == 0 || !self.fits_size_limit(width, height) {
            return None;
        }

        let key = CacheKey {
            width,
            height,
            format,
        };
        if let Some(fbo) = self.fbo_pool.take(key) {
            if self.debug_level() >= 2 {
                debug!("♻️ FBO cache hit: {}x{} {:?} ({:?})", width, height, format, usage);
            }
            return Some(fbo);
        }

        let Some(texture) = self.gl.create_texture(width, height, format) else {
            debug!("texture allocation failed: {}x{} {:?}", width, height, format);
            return None;
        };
        let fbo =
            self.create_fbo_from_texture(width, height, depth, texture, FboFlags::ADOPT_TEXTURE);
        if fbo.is_none() {
            self.gl.delete_texture(texture);
        }
        fbo
    }

    /// Wraps an existing texture. On failure the texture is left untouched
    /// and still belongs to the caller.
    pub fn create_fbo_from_texture(
        &mut self,
        width: u32,
        height: u32,
        depth: u8,
        texture: TextureHandle,
        flags: FboFlags,
    ) -> Option<Fbo> {
        let format = TextureFormat::for_depth(depth)?;
        if texture.0 == 0 {
            return None;
        }
        let Some(framebuffer) = self.gl.create_framebuffer(texture) else {
            debug!("framebuffer for texture {} incomplete", texture.0);
            return None;
        };

        self.fbo_pool.stats.created += 1;
        if self.debug_level() >= 2 {
            debug!(
                "🆕 FBO {} on texture {}: {}x{} {:?}",
                framebuffer.0, texture.0, width, height, format
            );
        }
        Some(Fbo {
            width,
            height,
            texture_size: (width, height),
            format,
            texture,
            framebuffer,
            external: !flags.contains(FboFlags::ADOPT_TEXTURE),
            expire: 0,
        })
    }

    /// Releases an FBO that is no longer attached anywhere.
    pub fn destroy_fbo(&mut self, fbo: Fbo) {
        self.fbo_pool.stats.destroyed += 1;
        if fbo.external || !self.fbo_pool.config.enabled {
            trace!("purging FBO {}", fbo.framebuffer.0);
            self.fbo_pool.purge(self.gl.as_ref(), fbo);
        } else {
            let tick = self.tick();
            self.fbo_pool.put(self.gl.as_ref(), tick, fbo);
        }
    }

    /// Purges pooled FBOs that outlived their expiry tick.
    pub fn expire_fbos(&mut self) -> usize {
        let tick = self.tick();
        let expired = self.fbo_pool.expire(self.gl.as_ref(), tick);
        if expired > 0 && self.debug_level() >= 1 {
            debug!("🧹 Expired {} pooled FBOs at tick {}", expired, tick);
        }
        expired
    }

    pub fn fbo_stats(&self) -> &FboStats {
        self.fbo_pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::HeadlessGl;

    fn pool(expire_ticks: u64, max_per_size: usize) -> FboPool {
        FboPool::new(FboCacheConfig {
            enabled: true,
            expire_ticks,
            max_per_size,
        })
    }

    fn fbo(gl: &HeadlessGl, width: u32, height: u32) -> Fbo {
        let texture = gl.create_texture(width, height, TextureFormat::Bgra8).unwrap();
        let framebuffer = gl.create_framebuffer(texture).unwrap();
        Fbo {
            width,
            height,
            texture_size: (width, height),
            format: TextureFormat::Bgra8,
            texture,
            framebuffer,
            external: false,
            expire: 0,
        }
    }

    #[test]
    fn test_supported_depths() {
        for depth in [1, 8, 15, 16, 24, 30, 32] {
            assert!(is_supported_depth(depth), "depth {}", depth);
        }
        for depth in [0, 4, 12, 48] {
            assert!(!is_supported_depth(depth), "depth {}", depth);
        }
    }

    #[test]
    fn test_pool_reuses_matching_size() {
        let gl = HeadlessGl::default();
        let mut pool = pool(100, 4);
        let original = fbo(&gl, 32, 32);
        let framebuffer = original.framebuffer;
        pool.put(&gl, 0, original);

        let key = CacheKey {
            width: 32,
            height: 32,
            format: TextureFormat::Bgra8,
        };
        let reused = pool.take(key).unwrap();
        assert_eq!(reused.framebuffer, framebuffer);
        assert_eq!(pool.pooled(), 0);
        assert_eq!(pool.stats().reused, 1);

        let other = CacheKey { width: 16, ..key };
        assert!(pool.take(other).is_none());
    }

    #[test]
    fn test_pool_evicts_oldest_when_full() {
        let gl = HeadlessGl::default();
        let mut pool = pool(100, 1);
        let first = fbo(&gl, 8, 8);
        let first_texture = first.texture;
        pool.put(&gl, 0, first);
        pool.put(&gl, 1, fbo(&gl, 8, 8));

        assert_eq!(pool.pooled(), 1);
        assert_eq!(pool.stats().evicted, 1);
        assert!(!gl.is_live_texture(first_texture));
    }

    #[test]
    fn test_resized_fbo_pools_under_texture_size() {
        let gl = HeadlessGl::default();
        let mut pool = pool(100, 4);
        let mut resized = fbo(&gl, 64, 64);
        resized.width = 128;
        resized.height = 128;
        pool.put(&gl, 0, resized);

        let stale = CacheKey {
            width: 128,
            height: 128,
            format: TextureFormat::Bgra8,
        };
        assert!(pool.take(stale).is_none());
        let allocated = CacheKey {
            width: 64,
            height: 64,
            ..stale
        };
        assert_eq!(pool.take(allocated).unwrap().texture_size(), (64, 64));
    }

    #[test]
    fn test_huge_expiry_saturates() {
        let gl = HeadlessGl::default();
        let mut pool = pool(u64::MAX, 4);
        pool.put(&gl, 5, fbo(&gl, 8, 8));
        assert_eq!(pool.expire(&gl, u64::MAX), 0);
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_zero_bucket_size_pools_nothing() {
        let gl = HeadlessGl::default();
        let mut pool = pool(100, 0);
        let released = fbo(&gl, 8, 8);
        let texture = released.texture;
        pool.put(&gl, 0, released);

        assert_eq!(pool.pooled(), 0);
        assert_eq!(pool.stats().evicted, 1);
        assert!(!gl.is_live_texture(texture));
    }

    #[test]
    fn test_expire_is_idempotent() {
        let gl = HeadlessGl::default();
        let mut pool = pool(10, 4);
        pool.put(&gl, 0, fbo(&gl, 8, 8));
        pool.put(&gl, 5, fbo(&gl, 8, 8));

        assert_eq!(pool.expire(&gl, 10), 0);
        assert_eq!(pool.expire(&gl, 11), 1);
        assert_eq!(pool.expire(&gl, 11), 0);
        assert_eq!(pool.pooled(), 1);
        assert_eq!(pool.expire(&gl, 16), 1);
        assert_eq!(pool.pooled(), 0);
        assert_eq!(gl.stats().live_textures, 0);
    }

    #[test]
    fn test_purge_keeps_external_texture() {
        let gl = HeadlessGl::default();
        let mut pool = pool(10, 4);
        let mut external = fbo(&gl, 8, 8);
        external.external = true;
        let texture = external.texture;
        pool.purge(&gl, external);
        assert!(gl.is_live_texture(texture));
        assert_eq!(gl.stats().live_framebuffers, 0);
    }

    #[test]
    fn test_fini_drains_everything() {
        let gl = HeadlessGl::default();
        let mut pool = pool(10, 4);
        pool.put(&gl, 0, fbo(&gl, 8, 8));
        pool.put(&gl, 0, fbo(&gl, 16, 16));
        pool.fini(&gl);
        assert_eq!(pool.pooled(), 0);
        assert_eq!(gl.stats().live_textures, 0);
        assert_eq!(gl.stats().live_framebuffers, 0);
    }
}
