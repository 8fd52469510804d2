//! Host-side screen model
//!
//! The display server owns screens, pixmaps, windows and pictures. This
//! module models the slice of that world the acceleration layer touches:
//! - per-object private slots (`Screen::accel`, `Pixmap::accel`) gated by
//!   private key registration
//! - the screen's active rendering strategies ([`ScreenBackend`],
//!   [`PictureBackend`]), swapped when acceleration is installed
//! - the CPU surface allocator ([`SurfaceAllocator`]) every GPU path falls
//!   back to
//! - block/wakeup handler registration on the event loop

use crate::pixmap::PixmapBinding;
use crate::screen::ScreenContext;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub mod fb;

pub use fb::{FbAllocator, FbPictureBackend, FbScreenBackend};

/// Largest width or height the protocol can express.
pub const MAX_PIXMAP_DIMENSION: u32 = 32767;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixmapId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PictureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlyphId(pub u32);

/// Anything that can be rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Drawable {
    Window(WindowId),
    Pixmap(PixmapId),
}

/// Allocation hint passed down from pixmap creation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixmapUsage {
    #[default]
    Default,
    Scratch,
    BackingPixmap,
    GlyphPicture,
    /// Caller wants plain memory; never GPU-backed.
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One horizontal run of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub x: i32,
    pub y: i32,
    pub width: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawableInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub bits_per_pixel: u8,
}

/// Storage size of one pixel for a pixmap depth.
pub fn bits_per_pixel(depth: u8) -> u8 {
    match depth {
        0 | 1 => 1,
        2..=8 => 8,
        9..=16 => 16,
        _ => 32,
    }
}

/// Row stride in bytes, padded to a 32-bit boundary.
pub fn pixmap_pitch(width: u32, bits_per_pixel: u8) -> u32 {
    ((width * bits_per_pixel as u32 + 7) / 8 + 3) & !3
}

pub struct Pixmap {
    pub id: PixmapId,
    pub drawable: DrawableInfo,
    /// Row stride in bytes.
    pub dev_kind: u32,
    pub refcnt: u32,
    pub usage: PixmapUsage,
    /// CPU copy of the pixels; empty while the pixels live in an FBO.
    pub(crate) data: Vec<u8>,
    pub(crate) accel: Option<PixmapBinding>,
}

impl Pixmap {
    pub fn binding(&self) -> Option<&PixmapBinding> {
        self.accel.as_ref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub id: WindowId,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Backing pixmap assigned by the screen.
    pub pixmap: PixmapId,
}

/// Picture formats the render extension hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictFormat {
    A1,
    A8,
    R5G6B5,
    X8R8G8B8,
    A8R8G8B8,
    A2R10G10B10,
}

impl PictFormat {
    pub fn depth(self) -> u8 {
        match self {
            PictFormat::A1 => 1,
            PictFormat::A8 => 8,
            PictFormat::R5G6B5 => 16,
            PictFormat::X8R8G8B8 => 24,
            PictFormat::A8R8G8B8 => 32,
            PictFormat::A2R10G10B10 => 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Picture {
    pub id: PictureId,
    pub drawable: Drawable,
    pub format: PictFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictOp {
    Clear,
    Src,
    Over,
    In,
    Add,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeArgs {
    pub op: PictOp,
    pub src: PictureId,
    pub mask: Option<PictureId>,
    pub dst: PictureId,
    pub src_origin: (i32, i32),
    pub dst_origin: (i32, i32),
    pub width: u32,
    pub height: u32,
}

/// Trapezoid, triangle and glyph requests. Only the bounding boxes of the
/// primitives matter at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveArgs {
    pub op: PictOp,
    pub src: Option<PictureId>,
    pub dst: PictureId,
    pub shapes: Vec<Rect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOps {
    Software,
    Accelerated,
}

/// Graphics context as returned by `create_gc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gc {
    pub depth: u8,
    pub ops: GcOps,
}

/// New geometry for an existing pixmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixmapHeader {
    pub width: u32,
    pub height: u32,
    pub dev_kind: u32,
}

/// Screen-level rendering entry points.
///
/// The screen holds one active implementation; acceleration installs its own
/// and keeps the previous one to fall back to and to restore at close.
pub trait ScreenBackend {
    fn close_screen(&self, screen: &mut Screen) -> bool;

    fn create_gc(&self, screen: &mut Screen, depth: u8) -> Gc;

    fn create_pixmap(
        &self,
        screen: &mut Screen,
        width: u32,
        height: u32,
        depth: u8,
        usage: PixmapUsage,
    ) -> Option<PixmapId>;

    fn destroy_pixmap(&self, screen: &mut Screen, pixmap: PixmapId) -> bool;

    fn get_spans(&self, screen: &mut Screen, drawable: Drawable, spans: &[Span]) -> Vec<u8>;

    fn get_image(&self, screen: &mut Screen, drawable: Drawable, rect: Rect) -> Vec<u8>;

    fn change_window_attributes(&self, screen: &mut Screen, window: WindowId, mask: u32) -> bool;

    fn copy_window(
        &self,
        screen: &mut Screen,
        window: WindowId,
        old_origin: (i32, i32),
        region: &[Rect],
    );

    fn bitmap_to_region(&self, screen: &mut Screen, pixmap: PixmapId) -> Vec<Rect>;
}

/// Render extension entry points.
pub trait PictureBackend {
    fn create_picture(
        &self,
        screen: &mut Screen,
        drawable: Drawable,
        format: PictFormat,
    ) -> Option<PictureId>;

    fn destroy_picture(&self, screen: &mut Screen, picture: PictureId);

    fn composite(&self, screen: &mut Screen, args: &CompositeArgs);

    fn trapezoids(&self, screen: &mut Screen, args: &PrimitiveArgs);

    fn triangles(&self, screen: &mut Screen, args: &PrimitiveArgs);

    fn glyphs(&self, screen: &mut Screen, args: &PrimitiveArgs);

    fn add_traps(
        &self,
        screen: &mut Screen,
        picture: PictureId,
        offset: (i32, i32),
        traps: &[Rect],
    );

    fn unrealize_glyph(&self, screen: &mut Screen, glyph: GlyphId);
}

/// CPU-backed pixmap storage: the fallback for every GPU allocation.
pub trait SurfaceAllocator {
    fn create_pixmap(
        &self,
        screen: &mut Screen,
        width: u32,
        height: u32,
        depth: u8,
        usage: PixmapUsage,
    ) -> Option<PixmapId>;

    /// Drops one reference; frees the pixmap when it was the last.
    fn destroy_pixmap(&self, screen: &mut Screen, pixmap: PixmapId) -> bool;

    fn modify_pixmap_header(
        &self,
        screen: &mut Screen,
        pixmap: PixmapId,
        header: PixmapHeader,
    ) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivateScope {
    Screen,
    Pixmap,
}

/// Private key bookkeeping. A scope can be frozen once objects of that type
/// have been allocated; registrations against a frozen scope fail.
#[derive(Debug, Default)]
pub struct PrivateRegistry {
    registered: HashSet<PrivateScope>,
    frozen: HashSet<PrivateScope>,
}

impl PrivateRegistry {
    pub fn register(&mut self, scope: PrivateScope) -> bool {
        if self.registered.contains(&scope) {
            return true;
        }
        if self.frozen.contains(&scope) {
            return false;
        }
        self.registered.insert(scope);
        true
    }

    pub fn freeze(&mut self, scope: PrivateScope) {
        self.frozen.insert(scope);
    }

    pub fn is_registered(&self, scope: PrivateScope) -> bool {
        self.registered.contains(&scope)
    }
}

/// Callback pair run around every event-loop select.
pub trait BlockHandler {
    fn block(&self);

    fn wakeup(&self, _result: i32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Block/wakeup handler registration on the server event loop.
#[derive(Default)]
pub struct EventLoopHooks {
    handlers: Vec<(HandlerId, Rc<dyn BlockHandler>)>,
    next_id: u64,
    limit: Option<usize>,
}

impl EventLoopHooks {
    /// Caps the number of registered handler pairs.
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn register(&mut self, handler: Rc<dyn BlockHandler>) -> Option<HandlerId> {
        if self.limit.is_some_and(|limit| self.handlers.len() >= limit) {
            return None;
        }
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, handler));
        Some(id)
    }

    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);
        self.handlers.len() != before
    }

    pub fn run_block(&self) {
        for (_, handler) in &self.handlers {
            handler.block();
        }
    }

    pub fn run_wakeup(&self, result: i32) {
        for (_, handler) in &self.handlers {
            handler.wakeup(result);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Counts of operations the software path executed, per screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftwareOpCounts {
    pub get_image: u64,
    pub get_spans: u64,
    pub copy_window: u64,
    pub composite: u64,
    pub trapezoids: u64,
    pub triangles: u64,
    pub glyphs: u64,
    pub add_traps: u64,
}

pub struct Screen {
    pub num: usize,
    pub privates: PrivateRegistry,
    pub event_loop: EventLoopHooks,
    pub software_ops: SoftwareOpCounts,
    pub(crate) pixmaps: HashMap<PixmapId, Pixmap>,
    pub(crate) windows: HashMap<WindowId, Window>,
    pub(crate) pictures: HashMap<PictureId, Picture>,
    pub(crate) screen_pixmap: Option<PixmapId>,
    pub(crate) backend: Rc<dyn ScreenBackend>,
    pub(crate) picture_backend: Option<Rc<dyn PictureBackend>>,
    pub(crate) fb: Rc<dyn SurfaceAllocator>,
    pub(crate) accel: Option<Box<ScreenContext>>,
    next_resource: u32,
    closed: bool,
}

impl Screen {
    /// Screen with the software path installed and picture support.
    pub fn new(num: usize) -> Self {
        Self::with_backends(
            num,
            Rc::new(FbAllocator),
            Rc::new(FbScreenBackend),
            Some(Rc::new(FbPictureBackend)),
        )
    }

    /// Screen without a picture screen (render extension disabled).
    pub fn without_picture(num: usize) -> Self {
        Self::with_backends(num, Rc::new(FbAllocator), Rc::new(FbScreenBackend), None)
    }

    pub fn with_backends(
        num: usize,
        fb: Rc<dyn SurfaceAllocator>,
        backend: Rc<dyn ScreenBackend>,
        picture_backend: Option<Rc<dyn PictureBackend>>,
    ) -> Self {
        Self {
            num,
            privates: PrivateRegistry::default(),
            event_loop: EventLoopHooks::default(),
            software_ops: SoftwareOpCounts::default(),
            pixmaps: HashMap::new(),
            windows: HashMap::new(),
            pictures: HashMap::new(),
            screen_pixmap: None,
            backend,
            picture_backend,
            fb,
            accel: None,
            next_resource: 1,
            closed: false,
        }
    }

    pub fn backend(&self) -> Rc<dyn ScreenBackend> {
        Rc::clone(&self.backend)
    }

    pub fn picture_backend(&self) -> Option<Rc<dyn PictureBackend>> {
        self.picture_backend.clone()
    }

    pub fn has_picture_screen(&self) -> bool {
        self.picture_backend.is_some()
    }

    /// Acceleration state, present between a successful init and teardown.
    pub fn accel(&self) -> Option<&ScreenContext> {
        self.accel.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub(crate) fn alloc_id(&mut self) -> u32 {
        let id = self.next_resource;
        self.next_resource += 1;
        id
    }

    pub fn pixmap(&self, id: PixmapId) -> Option<&Pixmap> {
        self.pixmaps.get(&id)
    }

    pub fn pixmap_mut(&mut self, id: PixmapId) -> Option<&mut Pixmap> {
        self.pixmaps.get_mut(&id)
    }

    pub fn pixmap_count(&self) -> usize {
        self.pixmaps.len()
    }

    pub fn screen_pixmap(&self) -> Option<PixmapId> {
        self.screen_pixmap
    }

    /// Takes another reference on a pixmap (e.g. a second client naming it).
    pub fn reference_pixmap(&mut self, id: PixmapId) -> bool {
        match self.pixmaps.get_mut(&id) {
            Some(pixmap) => {
                pixmap.refcnt += 1;
                true
            }
            None => false,
        }
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    /// Backing pixmap of a window.
    pub fn window_pixmap(&self, id: WindowId) -> Option<PixmapId> {
        self.windows.get(&id).map(|window| window.pixmap)
    }

    pub fn picture(&self, id: PictureId) -> Option<&Picture> {
        self.pictures.get(&id)
    }

    /// Creates a window with its own backing pixmap allocated through the
    /// active strategy.
    pub fn create_window(
        &mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        depth: u8,
    ) -> Option<WindowId> {
        let pixmap = self.create_pixmap(width, height, depth, PixmapUsage::BackingPixmap)?;
        let id = WindowId(self.alloc_id());
        self.windows.insert(
            id,
            Window {
                id,
                x,
                y,
                width,
                height,
                pixmap,
            },
        );
        debug!("screen {}: window {} {}x{} on pixmap {}", self.num, id.0, width, height, pixmap.0);
        Some(id)
    }

    pub fn destroy_window(&mut self, id: WindowId) -> bool {
        match self.windows.remove(&id) {
            Some(window) => self.destroy_pixmap(window.pixmap),
            None => false,
        }
    }

    /// Moves a window and lets the active strategy copy its contents.
    pub fn move_window(&mut self, id: WindowId, x: i32, y: i32) -> bool {
        let Some(window) = self.windows.get_mut(&id) else {
            return false;
        };
        let old_origin = (window.x, window.y);
        window.x = x;
        window.y = y;
        let region = [Rect::new(x, y, window.width, window.height)];
        self.copy_window(id, old_origin, &region);
        true
    }

    // Dispatch through the active screen strategy.

    pub fn close(&mut self) -> bool {
        let backend = self.backend();
        backend.close_screen(self)
    }

    pub fn create_gc(&mut self, depth: u8) -> Gc {
        let backend = self.backend();
        backend.create_gc(self, depth)
    }

    pub fn create_pixmap(
        &mut self,
        width: u32,
        height: u32,
        depth: u8,
        usage: PixmapUsage,
    ) -> Option<PixmapId> {
        let backend = self.backend();
        backend.create_pixmap(self, width, height, depth, usage)
    }

    pub fn destroy_pixmap(&mut self, pixmap: PixmapId) -> bool {
        let backend = self.backend();
        backend.destroy_pixmap(self, pixmap)
    }

    pub fn get_spans(&mut self, drawable: Drawable, spans: &[Span]) -> Vec<u8> {
        let backend = self.backend();
        backend.get_spans(self, drawable, spans)
    }

    pub fn get_image(&mut self, drawable: Drawable, rect: Rect) -> Vec<u8> {
        let backend = self.backend();
        backend.get_image(self, drawable, rect)
    }

    pub fn change_window_attributes(&mut self, window: WindowId, mask: u32) -> bool {
        let backend = self.backend();
        backend.change_window_attributes(self, window, mask)
    }

    pub fn copy_window(&mut self, window: WindowId, old_origin: (i32, i32), region: &[Rect]) {
        let backend = self.backend();
        backend.copy_window(self, window, old_origin, region)
    }

    pub fn bitmap_to_region(&mut self, pixmap: PixmapId) -> Vec<Rect> {
        let backend = self.backend();
        backend.bitmap_to_region(self, pixmap)
    }

    // Dispatch through the active picture strategy.

    pub fn create_picture(&mut self, drawable: Drawable, format: PictFormat) -> Option<PictureId> {
        let backend = self.picture_backend()?;
        backend.create_picture(self, drawable, format)
    }

    pub fn destroy_picture(&mut self, picture: PictureId) {
        match self.picture_backend() {
            Some(backend) => backend.destroy_picture(self, picture),
            None => warn!("screen {}: destroy_picture without picture screen", self.num),
        }
    }

    pub fn composite(&mut self, args: &CompositeArgs) {
        if let Some(backend) = self.picture_backend() {
            backend.composite(self, args);
        }
    }

    pub fn trapezoids(&mut self, args: &PrimitiveArgs) {
        if let Some(backend) = self.picture_backend() {
            backend.trapezoids(self, args);
        }
    }

    pub fn triangles(&mut self, args: &PrimitiveArgs) {
        if let Some(backend) = self.picture_backend() {
            backend.triangles(self, args);
        }
    }

    pub fn glyphs(&mut self, args: &PrimitiveArgs) {
        if let Some(backend) = self.picture_backend() {
            backend.glyphs(self, args);
        }
    }

    pub fn add_traps(&mut self, picture: PictureId, offset: (i32, i32), traps: &[Rect]) {
        if let Some(backend) = self.picture_backend() {
            backend.add_traps(self, picture, offset, traps);
        }
    }

    pub fn unrealize_glyph(&mut self, glyph: GlyphId) {
        if let Some(backend) = self.picture_backend() {
            backend.unrealize_glyph(self, glyph);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::cell::Cell<u32>);

    impl BlockHandler for CountingHandler {
        fn block(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_pixmap_pitch_rounds_to_four_bytes() {
        assert_eq!(pixmap_pitch(100, 32), 400);
        assert_eq!(pixmap_pitch(3, 8), 4);
        assert_eq!(pixmap_pitch(1, 1), 4);
        assert_eq!(pixmap_pitch(33, 1), 8);
        assert_eq!(pixmap_pitch(0, 32), 0);
    }

    #[test]
    fn test_bits_per_pixel_for_depth() {
        assert_eq!(bits_per_pixel(1), 1);
        assert_eq!(bits_per_pixel(8), 8);
        assert_eq!(bits_per_pixel(15), 16);
        assert_eq!(bits_per_pixel(24), 32);
        assert_eq!(bits_per_pixel(30), 32);
    }

    #[test]
    fn test_private_registry_freeze() {
        let mut registry = PrivateRegistry::default();
        registry.freeze(PrivateScope::Pixmap);
        assert!(registry.register(PrivateScope::Screen));
        assert!(!registry.register(PrivateScope::Pixmap));
        assert!(registry.is_registered(PrivateScope::Screen));
        assert!(!registry.is_registered(PrivateScope::Pixmap));
    }

    #[test]
    fn test_event_loop_register_and_remove() {
        let mut hooks = EventLoopHooks::default();
        let handler = Rc::new(CountingHandler(std::cell::Cell::new(0)));
        let id = hooks.register(handler.clone()).unwrap();
        hooks.run_block();
        hooks.run_block();
        assert_eq!(handler.0.get(), 2);

        assert!(hooks.remove(id));
        assert!(!hooks.remove(id));
        hooks.run_block();
        assert_eq!(handler.0.get(), 2);
    }

    #[test]
    fn test_event_loop_limit() {
        let mut hooks = EventLoopHooks::default();
        hooks.set_limit(Some(1));
        let handler = Rc::new(CountingHandler(std::cell::Cell::new(0)));
        assert!(hooks.register(handler.clone()).is_some());
        assert!(hooks.register(handler).is_none());
        assert_eq!(hooks.len(), 1);
    }

    #[test]
    fn test_window_gets_backing_pixmap() {
        let mut screen = Screen::new(0);
        let window = screen.create_window(10, 20, 64, 32, 24).unwrap();
        let pixmap = screen.window_pixmap(window).unwrap();
        let info = screen.pixmap(pixmap).unwrap().drawable;
        assert_eq!((info.width, info.height), (64, 32));

        assert!(screen.destroy_window(window));
        assert!(screen.pixmap(pixmap).is_none());
    }
}
