//! Per-screen acceleration state and its lifecycle
//!
//! [`init`] validates the GL context, installs the accelerated strategies
//! and attaches a [`ScreenContext`] to the screen. [`close_screen`] undoes
//! exactly what the recorded [`InitFlags`] say was done. Nothing is attached
//! to the screen until every fallible step has succeeded, so a failed init
//! leaves the screen as it found it.

use crate::backend::{AccelPictureBackend, AccelScreenBackend};
use crate::config::AccelConfig;
use crate::error::{AccelError, AccelResult};
use crate::fbo::FboPool;
use crate::gl::{
    parse_version, FramebufferHandle, GlCap, GlDispatch, GlFlavor, GlVersion, EXT_FRAMEBUFFER_BLIT,
    MESA_PACK_INVERT,
};
use crate::host::{BlockHandler, HandlerId, PictureBackend, PrivateScope, Screen, ScreenBackend};
use crate::render::AccelRenderer;
use bitflags::bitflags;
use log::{debug, error, info, warn};
use std::rc::Rc;

bitflags! {
    /// What [`init`] installs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InitFlags: u32 {
        const INVERTED_Y_AXIS = 1 << 0;
        /// Screen strategy plus the event-loop flush handler.
        const USE_SCREEN = 1 << 1;
        /// Picture strategy.
        const USE_PICTURE_SCREEN = 1 << 2;
    }
}

/// Driver limits and optional features read at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub has_pack_invert: bool,
    pub has_fbo_blit: bool,
    /// Largest FBO edge in pixels.
    pub max_fbo_size: u32,
}

/// Strategies that were active before installation.
#[derive(Default)]
pub(crate) struct SavedProcs {
    pub(crate) screen: Option<Rc<dyn ScreenBackend>>,
    pub(crate) picture: Option<Rc<dyn PictureBackend>>,
}

/// Flushes queued GL work whenever the server is about to sleep.
struct GlFlushHandler {
    gl: Rc<dyn GlDispatch>,
}

impl BlockHandler for GlFlushHandler {
    fn block(&self) {
        self.gl.flush();
        self.gl.finish();
    }
}

pub struct ScreenContext {
    pub(crate) gl: Rc<dyn GlDispatch>,
    pub(crate) renderer: Box<dyn AccelRenderer>,
    pub(crate) fbo_pool: FboPool,
    caps: Capabilities,
    flavor: GlFlavor,
    version: GlVersion,
    y_inverted: bool,
    tick: u64,
    flags: InitFlags,
    pub(crate) saved: SavedProcs,
    block_handler: Option<HandlerId>,
    pub(crate) screen_fbo: Option<FramebufferHandle>,
    debug_level: u32,
}

impl ScreenContext {
    pub fn gl(&self) -> &dyn GlDispatch {
        self.gl.as_ref()
    }

    pub fn caps(&self) -> Capabilities {
        self.caps
    }

    pub fn flavor(&self) -> GlFlavor {
        self.flavor
    }

    pub fn version(&self) -> GlVersion {
        self.version
    }

    pub fn is_y_inverted(&self) -> bool {
        self.y_inverted
    }

    /// Block-handler invocations since init.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn flags(&self) -> InitFlags {
        self.flags
    }

    /// Framebuffer of the screen pixmap, once one has been set.
    pub fn screen_fbo(&self) -> Option<FramebufferHandle> {
        self.screen_fbo
    }

    pub fn debug_level(&self) -> u32 {
        self.debug_level
    }

    pub fn block_handler_id(&self) -> Option<HandlerId> {
        self.block_handler
    }
}

/// Checks the context's version and mandatory extensions.
fn check_gl(gl: &dyn GlDispatch) -> AccelResult<(GlFlavor, GlVersion)> {
    let version_string = gl.version_string();
    let (flavor, version) = parse_version(&version_string)
        .ok_or_else(|| AccelError::UnknownGlVersion(version_string.clone()))?;

    let required = flavor.minimum_version();
    if version < required {
        return Err(AccelError::UnsupportedGlVersion {
            flavor,
            required,
            found: version,
        });
    }
    if let Some(missing) = flavor
        .required_extensions()
        .iter()
        .copied()
        .find(|extension| !gl.has_extension(extension))
    {
        return Err(AccelError::MissingExtension(missing));
    }
    Ok((flavor, version))
}

fn query_caps(gl: &dyn GlDispatch) -> Capabilities {
    Capabilities {
        has_pack_invert: gl.has_extension(MESA_PACK_INVERT),
        has_fbo_blit: gl.has_extension(EXT_FRAMEBUFFER_BLIT),
        max_fbo_size: gl.get_integer(GlCap::MaxRenderbufferSize).max(0) as u32,
    }
}

/// Brings up acceleration on `screen`.
///
/// `flags` is the raw bitmask from the DDX; unknown bits are rejected before
/// anything is touched. On error the screen's strategies, private slot and
/// event loop are exactly as they were.
pub fn init(
    screen: &mut Screen,
    flags: u32,
    gl: Rc<dyn GlDispatch>,
    mut renderer: Box<dyn AccelRenderer>,
    config: &AccelConfig,
) -> AccelResult<()> {
    let num = screen.num;
    let flags = InitFlags::from_bits(flags).ok_or(AccelError::InvalidFlags(flags))?;
    config.validate().map_err(|err| {
        error!("screen {}: {}", num, err);
        AccelError::InvalidConfig(err.to_string())
    })?;
    if screen.accel.is_some() {
        return Err(AccelError::AlreadyInitialized(num));
    }
    if flags.contains(InitFlags::USE_PICTURE_SCREEN) && !screen.has_picture_screen() {
        error!("screen {}: picture acceleration requested without picture screen", num);
        return Err(AccelError::NoPictureScreen(num));
    }

    for scope in [PrivateScope::Screen, PrivateScope::Pixmap] {
        if !screen.privates.register(scope) {
            error!("screen {}: failed to allocate {:?} private", num, scope);
            return Err(AccelError::Registration(scope));
        }
    }

    let (flavor, version) = check_gl(gl.as_ref()).inspect_err(|err| {
        error!("screen {}: {}", num, err);
    })?;
    let caps = query_caps(gl.as_ref());
    debug!(
        "screen {}: {} {}, max FBO {}, pack invert {}, FBO blit {}",
        num, flavor, version, caps.max_fbo_size, caps.has_pack_invert, caps.has_fbo_blit
    );

    // Last fallible step; everything after it only swaps pointers
    let block_handler = if flags.contains(InitFlags::USE_SCREEN) {
        let handler = Rc::new(GlFlushHandler { gl: Rc::clone(&gl) });
        let Some(id) = screen.event_loop.register(handler) else {
            error!("screen {}: failed to register block handler", num);
            return Err(AccelError::BlockHandlerRegistration);
        };
        Some(id)
    } else {
        None
    };

    let mut saved = SavedProcs::default();
    if flags.contains(InitFlags::USE_SCREEN) {
        let previous = screen.backend();
        screen.backend = Rc::new(AccelScreenBackend::new(Rc::clone(&previous)));
        saved.screen = Some(previous);
    }
    if flags.contains(InitFlags::USE_PICTURE_SCREEN) {
        if let Some(previous) = screen.picture_backend() {
            screen.picture_backend = Some(Rc::new(AccelPictureBackend::new(Rc::clone(&previous))));
            saved.picture = Some(previous);
        }
    }

    renderer.init(
        gl.as_ref(),
        flavor,
        flags.contains(InitFlags::USE_PICTURE_SCREEN),
    );

    let ctx = Box::new(ScreenContext {
        gl,
        renderer,
        fbo_pool: FboPool::new(config.fbo_cache.clone()),
        caps,
        flavor,
        version,
        y_inverted: flags.contains(InitFlags::INVERTED_Y_AXIS),
        tick: 0,
        flags,
        saved,
        block_handler,
        screen_fbo: None,
        debug_level: config.debug_level,
    });
    screen.accel = Some(ctx);
    info!("🚀 screen {}: acceleration initialized ({:?})", num, flags);
    Ok(())
}

/// Restores the saved strategies and releases every GPU resource.
/// Returns the context so the caller can chain to the restored close.
fn teardown(screen: &mut Screen) -> Option<Box<ScreenContext>> {
    let num = screen.num;
    let mut ctx = screen.accel.take()?;
    ctx.renderer.fini_glyphs();

    if ctx.flags.contains(InitFlags::USE_SCREEN) {
        if let Some(previous) = ctx.saved.screen.take() {
            screen.backend = previous;
        }
    }
    if ctx.flags.contains(InitFlags::USE_PICTURE_SCREEN) {
        if let Some(previous) = ctx.saved.picture.take() {
            screen.picture_backend = Some(previous);
        }
    }

    if let Some(id) = ctx.block_handler.take() {
        if !screen.event_loop.remove(id) {
            warn!("screen {}: block handler already gone", num);
        }
    }

    let mut released = 0;
    for pixmap in screen.pixmaps.values_mut() {
        if let Some(fbo) = pixmap.accel.take().and_then(|mut binding| binding.detach_fbo()) {
            ctx.destroy_fbo(fbo);
            released += 1;
        }
    }
    ctx.fbo_pool.fini(ctx.gl.as_ref());
    ctx.renderer.fini(ctx.gl.as_ref());
    ctx.screen_fbo = None;
    screen.screen_pixmap = None;

    info!(
        "screen {}: acceleration torn down, {} bound FBOs released",
        num, released
    );
    Some(ctx)
}

/// Screen close hook. Chains to the restored screen strategy when the
/// screen strategy had been installed.
pub fn close_screen(screen: &mut Screen) -> bool {
    let Some(ctx) = teardown(screen) else {
        warn!("screen {}: close without acceleration", screen.num);
        return false;
    };

    if ctx.flags.contains(InitFlags::USE_SCREEN) {
        screen.close()
    } else {
        true
    }
}

/// Releases acceleration for DDXs that never installed the screen strategy.
/// Does nothing once the context is gone.
pub fn fini(screen: &mut Screen) {
    if teardown(screen).is_some() {
        debug!("screen {}: fini released context", screen.num);
    }
}

/// Per-iteration housekeeping: advances the tick, drains the GL queue and
/// expires stale pooled FBOs.
pub fn block_handler(screen: &mut Screen) {
    let Some(ctx) = screen.accel.as_deref_mut() else {
        return;
    };
    ctx.tick += 1;
    ctx.gl.flush();
    ctx.gl.finish();
    ctx.expire_fbos();
}
