//! Accelerated screen and picture strategies
//!
//! Installed over the screen's previous strategies by [`crate::screen::init`].
//! Pixmap creation and destruction go through the binding registry. Drawing
//! and readback are offered to the renderer when the target is FBO-backed;
//! anything else, or anything the renderer declines, runs on the wrapped
//! strategy.

use crate::host::{
    CompositeArgs, Drawable, Gc, GcOps, GlyphId, PictFormat, PictureBackend, PictureId, PixmapId,
    PixmapUsage, PrimitiveArgs, Rect, Screen, ScreenBackend, Span, WindowId,
};
use crate::pixmap::{self, resolve_backing_surface, PixmapType};
use crate::render::{RenderOp, RenderOutcome};
use log::trace;
use std::rc::Rc;

/// Runs `op` on the GPU when `drawable` is FBO-backed. `None` means the
/// caller has to fall back.
fn try_render(screen: &mut Screen, drawable: Drawable, op: &RenderOp<'_>) -> Option<RenderOutcome> {
    let pixmap = resolve_backing_surface(screen, drawable)?;
    let ctx = screen.accel.as_deref_mut()?;
    let fbo = screen.pixmaps.get(&pixmap)?.accel.as_ref()?.fbo()?;

    match ctx.renderer.execute(ctx.gl.as_ref(), fbo, op) {
        RenderOutcome::Unsupported => {
            trace!("renderer declined {:?}, falling back", op);
            None
        }
        outcome => Some(outcome),
    }
}

fn picture_drawable(screen: &Screen, picture: PictureId) -> Option<Drawable> {
    screen.picture(picture).map(|picture| picture.drawable)
}

pub struct AccelScreenBackend {
    wrapped: Rc<dyn ScreenBackend>,
}

impl AccelScreenBackend {
    pub fn new(wrapped: Rc<dyn ScreenBackend>) -> Self {
        Self { wrapped }
    }

    /// Strategy this one falls back to.
    pub fn wrapped(&self) -> &Rc<dyn ScreenBackend> {
        &self.wrapped
    }
}

impl ScreenBackend for AccelScreenBackend {
    fn close_screen(&self, screen: &mut Screen) -> bool {
        crate::screen::close_screen(screen)
    }

    fn create_gc(&self, screen: &mut Screen, depth: u8) -> Gc {
        let gc = self.wrapped.create_gc(screen, depth);
        Gc {
            ops: GcOps::Accelerated,
            ..gc
        }
    }

    fn create_pixmap(
        &self,
        screen: &mut Screen,
        width: u32,
        height: u32,
        depth: u8,
        usage: PixmapUsage,
    ) -> Option<PixmapId> {
        pixmap::create_pixmap(screen, width, height, depth, usage)
    }

    fn destroy_pixmap(&self, screen: &mut Screen, pixmap: PixmapId) -> bool {
        pixmap::destroy_pixmap(screen, pixmap)
    }

    fn get_spans(&self, screen: &mut Screen, drawable: Drawable, spans: &[Span]) -> Vec<u8> {
        match try_render(screen, drawable, &RenderOp::GetSpans { spans }) {
            Some(RenderOutcome::Pixels(pixels)) => pixels,
            _ => self.wrapped.get_spans(screen, drawable, spans),
        }
    }

    fn get_image(&self, screen: &mut Screen, drawable: Drawable, rect: Rect) -> Vec<u8> {
        match try_render(screen, drawable, &RenderOp::GetImage { rect }) {
            Some(RenderOutcome::Pixels(pixels)) => pixels,
            _ => self.wrapped.get_image(screen, drawable, rect),
        }
    }

    fn change_window_attributes(&self, screen: &mut Screen, window: WindowId, mask: u32) -> bool {
        self.wrapped.change_window_attributes(screen, window, mask)
    }

    fn copy_window(
        &self,
        screen: &mut Screen,
        window: WindowId,
        old_origin: (i32, i32),
        region: &[Rect],
    ) {
        let Some(current) = screen.window(window).copied() else {
            return;
        };
        let op = RenderOp::CopyWindow {
            delta: (current.x - old_origin.0, current.y - old_origin.1),
            region,
        };
        if try_render(screen, Drawable::Window(window), &op).is_none() {
            self.wrapped.copy_window(screen, window, old_origin, region);
        }
    }

    fn bitmap_to_region(&self, screen: &mut Screen, pixmap: PixmapId) -> Vec<Rect> {
        self.wrapped.bitmap_to_region(screen, pixmap)
    }
}

pub struct AccelPictureBackend {
    wrapped: Rc<dyn PictureBackend>,
}

impl AccelPictureBackend {
    pub fn new(wrapped: Rc<dyn PictureBackend>) -> Self {
        Self { wrapped }
    }

    pub fn wrapped(&self) -> &Rc<dyn PictureBackend> {
        &self.wrapped
    }

    fn render_or<F>(&self, screen: &mut Screen, picture: PictureId, op: &RenderOp<'_>, fallback: F)
    where
        F: FnOnce(&mut Screen),
    {
        let rendered = picture_drawable(screen, picture)
            .and_then(|drawable| try_render(screen, drawable, op))
            .is_some();
        if !rendered {
            fallback(screen);
        }
    }
}

impl PictureBackend for AccelPictureBackend {
    fn create_picture(
        &self,
        screen: &mut Screen,
        drawable: Drawable,
        format: PictFormat,
    ) -> Option<PictureId> {
        if let Some(pixmap) = resolve_backing_surface(screen, drawable) {
            // Pixmaps nobody bound yet are plain memory as far as we know
            if screen.pixmap(pixmap).is_some_and(|p| p.binding().is_none()) {
                pixmap::set_pixmap_type(screen, pixmap, PixmapType::Memory);
            }
            if let Some(binding) = screen.pixmap_mut(pixmap).and_then(|p| p.accel.as_mut()) {
                binding.set_pict_format(Some(format));
            }
        }
        self.wrapped.create_picture(screen, drawable, format)
    }

    fn destroy_picture(&self, screen: &mut Screen, picture: PictureId) {
        let pixmap = picture_drawable(screen, picture)
            .and_then(|drawable| resolve_backing_surface(screen, drawable));
        if let Some(binding) = pixmap
            .and_then(|id| screen.pixmap_mut(id))
            .and_then(|p| p.accel.as_mut())
        {
            binding.set_pict_format(None);
        }
        self.wrapped.destroy_picture(screen, picture);
    }

    fn composite(&self, screen: &mut Screen, args: &CompositeArgs) {
        self.render_or(screen, args.dst, &RenderOp::Composite(args), |screen| {
            self.wrapped.composite(screen, args)
        });
    }

    fn trapezoids(&self, screen: &mut Screen, args: &PrimitiveArgs) {
        self.render_or(screen, args.dst, &RenderOp::Trapezoids(args), |screen| {
            self.wrapped.trapezoids(screen, args)
        });
    }

    fn triangles(&self, screen: &mut Screen, args: &PrimitiveArgs) {
        self.render_or(screen, args.dst, &RenderOp::Triangles(args), |screen| {
            self.wrapped.triangles(screen, args)
        });
    }

    fn glyphs(&self, screen: &mut Screen, args: &PrimitiveArgs) {
        self.render_or(screen, args.dst, &RenderOp::Glyphs(args), |screen| {
            self.wrapped.glyphs(screen, args)
        });
    }

    fn add_traps(
        &self,
        screen: &mut Screen,
        picture: PictureId,
        offset: (i32, i32),
        traps: &[Rect],
    ) {
        self.render_or(screen, picture, &RenderOp::AddTraps { offset, traps }, |screen| {
            self.wrapped.add_traps(screen, picture, offset, traps)
        });
    }

    fn unrealize_glyph(&self, screen: &mut Screen, glyph: GlyphId) {
        if let Some(ctx) = screen.accel.as_deref_mut() {
            ctx.renderer.unrealize_glyph(glyph);
        }
        self.wrapped.unrealize_glyph(screen, glyph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccelConfig;
    use crate::gl::HeadlessGl;
    use crate::render::NullRenderer;
    use crate::screen::{init, InitFlags};

    fn accelerated_screen() -> Screen {
        let mut screen = Screen::new(0);
        init(
            &mut screen,
            (InitFlags::USE_SCREEN | InitFlags::USE_PICTURE_SCREEN).bits(),
            Rc::new(HeadlessGl::default()),
            Box::new(NullRenderer),
            &AccelConfig::default(),
        )
        .unwrap();
        screen
    }

    #[test]
    fn test_gc_gets_accelerated_ops() {
        let mut screen = accelerated_screen();
        let gc = screen.create_gc(24);
        assert_eq!(gc.ops, GcOps::Accelerated);
        assert_eq!(gc.depth, 24);
    }

    #[test]
    fn test_declined_readback_falls_back() {
        let mut screen = accelerated_screen();
        let pixmap = screen.create_pixmap(4, 4, 32, PixmapUsage::Default).unwrap();
        assert!(pixmap::is_gpu_backed(&screen, pixmap));

        let pixels = screen.get_image(Drawable::Pixmap(pixmap), Rect::new(0, 0, 2, 2));
        assert_eq!(pixels.len(), 16);
        assert_eq!(screen.software_ops.get_image, 1);
    }

    #[test]
    fn test_picture_on_unbound_pixmap_tags_memory() {
        let mut screen = accelerated_screen();
        let pixmap = screen.create_pixmap(4, 4, 8, PixmapUsage::Cpu).unwrap();
        let picture = screen
            .create_picture(Drawable::Pixmap(pixmap), PictFormat::A8)
            .unwrap();

        let binding = screen.pixmap(pixmap).unwrap().binding().unwrap();
        assert_eq!(binding.pixmap_type(), PixmapType::Memory);
        assert_eq!(binding.pict_format(), Some(PictFormat::A8));

        screen.destroy_picture(picture);
        let binding = screen.pixmap(pixmap).unwrap().binding().unwrap();
        assert_eq!(binding.pict_format(), None);
        assert!(screen.picture(picture).is_none());
    }
}
