//! Pixmap binding registry
//!
//! Every pixmap the accelerated screen cares about carries a
//! [`PixmapBinding`] in its private slot: what kind of storage backs it and
//! the FBO holding its pixels, if any. Creation decides between GPU and CPU
//! storage; destruction hands the FBO back to the pool.

use crate::fbo::{is_supported_depth, Fbo, FboFlags};
use crate::gl::TextureHandle;
use crate::host::{
    bits_per_pixel, pixmap_pitch, Drawable, PictFormat, PixmapHeader, PixmapId, PixmapUsage,
    Screen, MAX_PIXMAP_DIMENSION,
};
use crate::screen::ScreenContext;
use log::{debug, trace, warn};
use std::rc::Rc;

/// Where a pixmap's pixels live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixmapType {
    /// Host memory only.
    Memory,
    /// Host memory mapped from a buffer object.
    MemoryMap,
    /// Texture imported from a DRM buffer.
    TextureDrm,
    /// Texture kept alongside a separate memory copy.
    SeparateTexture,
    /// DRM buffer without a texture.
    DrmOnly,
    /// Pixels live only in the texture.
    TextureOnly,
}

/// Per-pixmap acceleration record.
#[derive(Debug)]
pub struct PixmapBinding {
    container: PixmapId,
    screen: usize,
    pixmap_type: PixmapType,
    fbo: Option<Fbo>,
    pict_format: Option<PictFormat>,
}

impl PixmapBinding {
    pub fn new(container: PixmapId, screen: usize, pixmap_type: PixmapType) -> Self {
        Self {
            container,
            screen,
            pixmap_type,
            fbo: None,
            pict_format: None,
        }
    }

    pub fn container(&self) -> PixmapId {
        self.container
    }

    pub fn screen(&self) -> usize {
        self.screen
    }

    pub fn pixmap_type(&self) -> PixmapType {
        self.pixmap_type
    }

    pub fn fbo(&self) -> Option<&Fbo> {
        self.fbo.as_ref()
    }

    pub fn pict_format(&self) -> Option<PictFormat> {
        self.pict_format
    }

    pub(crate) fn set_pict_format(&mut self, format: Option<PictFormat>) {
        self.pict_format = format;
    }

    /// Installs `fbo` and hands back the one it replaces, which the caller
    /// must release.
    #[must_use]
    pub(crate) fn attach_fbo(&mut self, fbo: Fbo) -> Option<Fbo> {
        self.fbo.replace(fbo)
    }

    pub(crate) fn detach_fbo(&mut self) -> Option<Fbo> {
        self.fbo.take()
    }
}

/// Attaches an FBO to a binding, releasing whatever was attached before.
fn attach(ctx: &mut ScreenContext, binding: &mut PixmapBinding, fbo: Fbo) {
    if let Some(previous) = binding.attach_fbo(fbo) {
        ctx.destroy_fbo(previous);
    }
}

/// Maps a drawable to the pixmap that holds its pixels: windows resolve to
/// their backing pixmap, pixmaps to themselves.
pub fn resolve_backing_surface(screen: &Screen, drawable: Drawable) -> Option<PixmapId> {
    match drawable {
        Drawable::Window(window) => screen.window_pixmap(window),
        Drawable::Pixmap(pixmap) => screen.pixmaps.contains_key(&pixmap).then_some(pixmap),
    }
}

/// Retags a pixmap, creating its binding on first use.
pub fn set_pixmap_type(screen: &mut Screen, pixmap: PixmapId, pixmap_type: PixmapType) -> bool {
    let num = screen.num;
    let Some(entry) = screen.pixmaps.get_mut(&pixmap) else {
        warn!("screen {}: set_pixmap_type on unknown pixmap {}", num, pixmap.0);
        return false;
    };
    entry
        .accel
        .get_or_insert_with(|| PixmapBinding::new(pixmap, num, pixmap_type))
        .pixmap_type = pixmap_type;
    true
}

/// Backs a pixmap with a caller-owned texture.
///
/// Any FBO already attached is released first. The texture is wrapped at the
/// pixmap's current geometry and never deleted by the pool. Returns `false`
/// when the texture could not be wrapped; the pixmap is then left unbacked.
pub fn set_pixmap_texture(screen: &mut Screen, pixmap: PixmapId, texture: TextureHandle) -> bool {
    let num = screen.num;
    let Some(ctx) = screen.accel.as_deref_mut() else {
        warn!("screen {}: set_pixmap_texture without acceleration", num);
        return false;
    };
    let Some(entry) = screen.pixmaps.get_mut(&pixmap) else {
        warn!("screen {}: set_pixmap_texture on unknown pixmap {}", num, pixmap.0);
        return false;
    };

    let binding = entry
        .accel
        .get_or_insert_with(|| PixmapBinding::new(pixmap, num, PixmapType::TextureOnly));
    if let Some(old) = binding.detach_fbo() {
        ctx.destroy_fbo(old);
    }

    let info = entry.drawable;
    let flags = FboFlags::empty();
    match ctx.create_fbo_from_texture(info.width, info.height, info.depth, texture, flags) {
        Some(fbo) => {
            attach(ctx, binding, fbo);
            true
        }
        None => {
            warn!(
                "screen {}: failed to wrap texture {} for pixmap {}",
                num, texture.0, pixmap.0
            );
            false
        }
    }
}

/// Makes `pixmap` the screen's front buffer and caches its framebuffer.
pub fn set_screen_pixmap(screen: &mut Screen, pixmap: PixmapId) -> bool {
    let num = screen.num;
    let (Some(ctx), Some(entry)) = (screen.accel.as_deref_mut(), screen.pixmaps.get_mut(&pixmap))
    else {
        warn!("screen {}: set_screen_pixmap({}) without context or pixmap", num, pixmap.0);
        return false;
    };

    let info = entry.drawable;
    let Some(fbo) = entry.accel.as_mut().and_then(|binding| binding.fbo.as_mut()) else {
        warn!("screen {}: screen pixmap {} has no FBO", num, pixmap.0);
        return false;
    };
    fbo.width = info.width;
    fbo.height = info.height;
    ctx.screen_fbo = Some(fbo.framebuffer());
    screen.screen_pixmap = Some(pixmap);
    debug!(
        "screen {}: screen pixmap {} on framebuffer {}",
        num,
        pixmap.0,
        fbo.framebuffer().0
    );
    true
}

/// Creates a pixmap, GPU-backed when the size, depth and usage allow it.
///
/// Oversized requests fail outright. Anything the GPU path cannot take, or
/// whose FBO allocation fails, is served by the CPU allocator instead.
pub fn create_pixmap(
    screen: &mut Screen,
    width: u32,
    height: u32,
    depth: u8,
    usage: PixmapUsage,
) -> Option<PixmapId> {
    if width > MAX_PIXMAP_DIMENSION || height > MAX_PIXMAP_DIMENSION {
        return None;
    }

    let fb = Rc::clone(&screen.fb);
    let gpu_capable = screen.accel.as_deref().is_some_and(|ctx| {
        ctx.fits_size_limit(width, height) && is_supported_depth(depth)
    });
    if !gpu_capable || usage == PixmapUsage::Cpu {
        return fb.create_pixmap(screen, width, height, depth, usage);
    }

    let shell = fb.create_pixmap(screen, 0, 0, depth, usage)?;
    let num = screen.num;
    if let Some(entry) = screen.pixmaps.get_mut(&shell) {
        entry.accel = Some(PixmapBinding::new(shell, num, PixmapType::TextureOnly));
    }
    if width == 0 || height == 0 {
        return Some(shell);
    }

    let fbo = screen
        .accel
        .as_deref_mut()
        .and_then(|ctx| ctx.create_fbo(width, height, depth, usage));
    let Some(fbo) = fbo else {
        if let Some(entry) = screen.pixmaps.get_mut(&shell) {
            entry.accel = None;
        }
        fb.destroy_pixmap(screen, shell);
        debug!(
            "screen {}: no FBO for {}x{} depth {}, using memory",
            num, width, height, depth
        );
        return fb.create_pixmap(screen, width, height, depth, usage);
    };

    if let (Some(ctx), Some(binding)) = (
        screen.accel.as_deref_mut(),
        screen.pixmaps.get_mut(&shell).and_then(|entry| entry.accel.as_mut()),
    ) {
        attach(ctx, binding, fbo);
    }

    let header = PixmapHeader {
        width,
        height,
        dev_kind: pixmap_pitch(width, bits_per_pixel(depth)),
    };
    fb.modify_pixmap_header(screen, shell, header);
    trace!("screen {}: pixmap {} {}x{} on GPU", num, shell.0, width, height);
    Some(shell)
}

/// Drops a reference to a pixmap. The last reference releases its FBO.
pub fn destroy_pixmap(screen: &mut Screen, pixmap: PixmapId) -> bool {
    let fb = Rc::clone(&screen.fb);
    let num = screen.num;

    let binding = screen
        .pixmaps
        .get_mut(&pixmap)
        .filter(|entry| entry.refcnt == 1)
        .and_then(|entry| entry.accel.take());
    if let Some(fbo) = binding.and_then(|mut binding| binding.detach_fbo()) {
        match screen.accel.as_deref_mut() {
            Some(ctx) => {
                if ctx.screen_fbo == Some(fbo.framebuffer()) {
                    ctx.screen_fbo = None;
                }
                ctx.destroy_fbo(fbo);
            }
            None => warn!(
                "screen {}: pixmap {} outlived its context, FBO {} leaked",
                num,
                pixmap.0,
                fbo.framebuffer().0
            ),
        }
    }
    let result = fb.destroy_pixmap(screen, pixmap);
    if screen.screen_pixmap == Some(pixmap) && screen.pixmap(pixmap).is_none() {
        screen.screen_pixmap = None;
    }
    result
}

/// The FBO backing a pixmap, if it is GPU-backed.
pub fn pixmap_fbo(screen: &Screen, pixmap: PixmapId) -> Option<&Fbo> {
    screen.pixmap(pixmap)?.binding()?.fbo()
}

pub fn pixmap_type(screen: &Screen, pixmap: PixmapId) -> Option<PixmapType> {
    Some(screen.pixmap(pixmap)?.binding()?.pixmap_type())
}

pub fn is_gpu_backed(screen: &Screen, pixmap: PixmapId) -> bool {
    pixmap_fbo(screen, pixmap).is_some()
}
