//! In-process GL dispatch
//!
//! Keeps the same books a driver would (live textures, live framebuffers,
//! command-queue barriers) without touching a GPU. The texture budget lets
//! callers reproduce allocation failure on demand.

use super::{FramebufferHandle, GlCap, GlDispatch, TextureFormat, TextureHandle};
use log::trace;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Counters exposed for assertions and soak reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessGlStats {
    pub live_textures: usize,
    pub live_framebuffers: usize,
    pub textures_created: u64,
    pub textures_deleted: u64,
    pub framebuffers_created: u64,
    pub framebuffers_deleted: u64,
    pub flushes: u64,
    pub finishes: u64,
    pub failed_allocations: u64,
    /// Bytes held by live textures.
    pub texture_memory: u64,
}

#[derive(Debug)]
struct HeadlessState {
    next_name: u32,
    textures: HashMap<TextureHandle, u64>,
    framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    texture_budget: Option<usize>,
    stats: HeadlessGlStats,
}

/// GL dispatch with no driver behind it.
#[derive(Debug)]
pub struct HeadlessGl {
    version: String,
    extensions: HashSet<String>,
    max_renderbuffer_size: i32,
    state: RefCell<HeadlessState>,
}

impl Default for HeadlessGl {
    fn default() -> Self {
        Self::new("4.5 axiom-headless")
    }
}

impl HeadlessGl {
    /// Creates a dispatch reporting `version` with an 8192 size limit and no
    /// extensions.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            extensions: HashSet::new(),
            max_renderbuffer_size: 8192,
            state: RefCell::new(HeadlessState {
                next_name: 1,
                textures: HashMap::new(),
                framebuffers: HashMap::new(),
                texture_budget: None,
                stats: HeadlessGlStats::default(),
            }),
        }
    }

    pub fn with_extension(mut self, name: &str) -> Self {
        self.extensions.insert(name.to_string());
        self
    }

    pub fn with_max_renderbuffer_size(mut self, size: i32) -> Self {
        self.max_renderbuffer_size = size;
        self
    }

    /// Caps the number of live textures; allocations beyond it fail.
    pub fn with_texture_budget(self, budget: usize) -> Self {
        self.set_texture_budget(Some(budget));
        self
    }

    pub fn set_texture_budget(&self, budget: Option<usize>) {
        self.state.borrow_mut().texture_budget = budget;
    }

    pub fn stats(&self) -> HeadlessGlStats {
        self.state.borrow().stats.clone()
    }

    pub fn is_live_texture(&self, texture: TextureHandle) -> bool {
        self.state.borrow().textures.contains_key(&texture)
    }

    pub fn is_live_framebuffer(&self, framebuffer: FramebufferHandle) -> bool {
        self.state.borrow().framebuffers.contains_key(&framebuffer)
    }
}

impl HeadlessState {
    fn next_name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }
}

impl GlDispatch for HeadlessGl {
    fn version_string(&self) -> String {
        self.version.clone()
    }

    fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    fn get_integer(&self, cap: GlCap) -> i32 {
        match cap {
            GlCap::MaxRenderbufferSize | GlCap::MaxTextureSize => self.max_renderbuffer_size,
        }
    }

    fn flush(&self) {
        self.state.borrow_mut().stats.flushes += 1;
    }

    fn finish(&self) {
        self.state.borrow_mut().stats.finishes += 1;
    }

    fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Option<TextureHandle> {
        let mut state = self.state.borrow_mut();
        let over_budget = state
            .texture_budget
            .is_some_and(|budget| state.textures.len() >= budget);
        let too_large = width as i64 > self.max_renderbuffer_size as i64
            || height as i64 > self.max_renderbuffer_size as i64;
        if over_budget || too_large || width == 0 || height == 0 {
            state.stats.failed_allocations += 1;
            return None;
        }

        let texture = TextureHandle(state.next_name());
        let bytes = width as u64 * height as u64 * format.bytes_per_pixel() as u64;
        state.textures.insert(texture, bytes);
        state.stats.textures_created += 1;
        state.stats.live_textures = state.textures.len();
        state.stats.texture_memory += bytes;
        trace!("headless: texture {} {}x{} {:?}", texture.0, width, height, format);
        Some(texture)
    }

    fn delete_texture(&self, texture: TextureHandle) {
        let mut state = self.state.borrow_mut();
        if let Some(bytes) = state.textures.remove(&texture) {
            state.stats.textures_deleted += 1;
            state.stats.live_textures = state.textures.len();
            state.stats.texture_memory -= bytes;
        }
    }

    fn create_framebuffer(&self, texture: TextureHandle) -> Option<FramebufferHandle> {
        let mut state = self.state.borrow_mut();
        if !state.textures.contains_key(&texture) {
            state.stats.failed_allocations += 1;
            return None;
        }

        let framebuffer = FramebufferHandle(state.next_name());
        state.framebuffers.insert(framebuffer, texture);
        state.stats.framebuffers_created += 1;
        state.stats.live_framebuffers = state.framebuffers.len();
        Some(framebuffer)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferHandle) {
        let mut state = self.state.borrow_mut();
        if state.framebuffers.remove(&framebuffer).is_some() {
            state.stats.framebuffers_deleted += 1;
            state.stats.live_framebuffers = state.framebuffers.len();
        }
    }
}
