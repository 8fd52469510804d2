//! Renderer collaborator
//!
//! Shaders, glyph caches and the actual GPU drawing live behind
//! [`AccelRenderer`]. The accelerated strategies hand it operations whose
//! target is FBO-backed; whatever it declines goes down the software path.

use crate::fbo::Fbo;
use crate::gl::{GlDispatch, GlFlavor};
use crate::host::{CompositeArgs, GlyphId, PrimitiveArgs, Rect, Span};
use log::debug;

/// A drawing request against one FBO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOp<'a> {
    GetImage {
        rect: Rect,
    },
    GetSpans {
        spans: &'a [Span],
    },
    CopyWindow {
        delta: (i32, i32),
        region: &'a [Rect],
    },
    Composite(&'a CompositeArgs),
    Trapezoids(&'a PrimitiveArgs),
    Triangles(&'a PrimitiveArgs),
    Glyphs(&'a PrimitiveArgs),
    AddTraps {
        offset: (i32, i32),
        traps: &'a [Rect],
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Drawn on the GPU.
    Done,
    /// Readback result.
    Pixels(Vec<u8>),
    /// Not handled; the caller falls back to software.
    Unsupported,
}

pub trait AccelRenderer {
    /// Builds shaders and caches. `picture` is set when the picture
    /// strategy is being accelerated too.
    fn init(&mut self, gl: &dyn GlDispatch, flavor: GlFlavor, picture: bool);

    fn fini(&mut self, gl: &dyn GlDispatch);

    /// Drops cached glyph textures; runs first during screen close.
    fn fini_glyphs(&mut self) {}

    fn unrealize_glyph(&mut self, _glyph: GlyphId) {}

    fn execute(&mut self, gl: &dyn GlDispatch, target: &Fbo, op: &RenderOp<'_>) -> RenderOutcome;
}

/// Renderer without any GPU paths: every operation falls back.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl AccelRenderer for NullRenderer {
    fn init(&mut self, _gl: &dyn GlDispatch, flavor: GlFlavor, picture: bool) {
        debug!("null renderer on {} (picture: {})", flavor, picture);
    }

    fn fini(&mut self, _gl: &dyn GlDispatch) {}

    fn execute(
        &mut self,
        _gl: &dyn GlDispatch,
        _target: &Fbo,
        _op: &RenderOp<'_>,
    ) -> RenderOutcome {
        RenderOutcome::Unsupported
    }
}
