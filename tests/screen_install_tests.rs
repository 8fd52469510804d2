// Screen install/teardown integration tests
//
// Checks that init installs exactly the requested strategies, that every
// failure leaves the screen untouched, and that close restores the
// previous strategies and releases all GPU resources.

use axiom_accel::fbo::Fbo;
use axiom_accel::gl::{GlDispatch, GlFlavor, HeadlessGl};
use axiom_accel::host::{
    CompositeArgs, Drawable, GlyphId, PictFormat, PictOp, PixmapUsage, PrimitiveArgs,
    PrivateScope, Rect, Screen,
};
use axiom_accel::{
    AccelConfig, AccelError, AccelRenderer, InitFlags, NullRenderer, RenderOp, RenderOutcome,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Renderer that draws composites and serves readbacks, logging each call.
#[derive(Default)]
struct RecordingRenderer {
    calls: Rc<RefCell<Vec<String>>>,
}

impl AccelRenderer for RecordingRenderer {
    fn init(&mut self, _gl: &dyn GlDispatch, flavor: GlFlavor, picture: bool) {
        self.calls
            .borrow_mut()
            .push(format!("init {} {}", flavor, picture));
    }

    fn fini(&mut self, _gl: &dyn GlDispatch) {
        self.calls.borrow_mut().push("fini".into());
    }

    fn fini_glyphs(&mut self) {
        self.calls.borrow_mut().push("fini_glyphs".into());
    }

    fn unrealize_glyph(&mut self, glyph: GlyphId) {
        self.calls
            .borrow_mut()
            .push(format!("unrealize {}", glyph.0));
    }

    fn execute(
        &mut self,
        _gl: &dyn GlDispatch,
        target: &Fbo,
        op: &RenderOp<'_>,
    ) -> RenderOutcome {
        match op {
            RenderOp::Composite(_) => {
                self.calls
                    .borrow_mut()
                    .push(format!("composite on {}", target.framebuffer().0));
                RenderOutcome::Done
            }
            RenderOp::GetImage { rect } => {
                RenderOutcome::Pixels(vec![0xff; (rect.width * rect.height * 4) as usize])
            }
            _ => RenderOutcome::Unsupported,
        }
    }
}

fn same<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>()
}

fn init_with(screen: &mut Screen, flags: InitFlags) -> Result<(), AccelError> {
    axiom_accel::init(
        screen,
        flags.bits(),
        Rc::new(HeadlessGl::default()),
        Box::new(NullRenderer),
        &AccelConfig::default(),
    )
}

#[test]
fn test_every_flag_subset_restores_strategies() {
    for bits in 0..8u32 {
        let flags = InitFlags::from_bits(bits).unwrap();
        let mut screen = Screen::new(0);
        let screen_backend = screen.backend();
        let picture_backend = screen.picture_backend().unwrap();

        init_with(&mut screen, flags).unwrap();
        assert_eq!(
            !same(&screen.backend(), &screen_backend),
            flags.contains(InitFlags::USE_SCREEN),
            "screen strategy for {:?}",
            flags
        );
        assert_eq!(
            !same(&screen.picture_backend().unwrap(), &picture_backend),
            flags.contains(InitFlags::USE_PICTURE_SCREEN),
            "picture strategy for {:?}",
            flags
        );
        assert_eq!(
            screen.event_loop.len(),
            usize::from(flags.contains(InitFlags::USE_SCREEN))
        );
        assert_eq!(
            screen.accel().unwrap().is_y_inverted(),
            flags.contains(InitFlags::INVERTED_Y_AXIS)
        );

        assert!(axiom_accel::close_screen(&mut screen));
        assert!(screen.accel().is_none());
        assert!(same(&screen.backend(), &screen_backend));
        assert!(same(&screen.picture_backend().unwrap(), &picture_backend));
        assert!(screen.event_loop.is_empty());
        // Only an installed screen strategy chains the close
        assert_eq!(screen.is_closed(), flags.contains(InitFlags::USE_SCREEN));
    }
}

#[test]
fn test_unknown_flags_allocate_nothing() {
    let mut screen = Screen::new(0);
    let backend = screen.backend();
    let err = axiom_accel::init(
        &mut screen,
        0x10 | InitFlags::USE_SCREEN.bits(),
        Rc::new(HeadlessGl::default()),
        Box::new(NullRenderer),
        &AccelConfig::default(),
    )
    .unwrap_err();

    assert_eq!(err, AccelError::InvalidFlags(0x12));
    assert!(screen.accel().is_none());
    assert!(same(&screen.backend(), &backend));
    assert!(screen.event_loop.is_empty());
}

#[test]
fn test_invalid_config_allocates_nothing() {
    let mut overflowing = AccelConfig::default();
    overflowing.fbo_cache.expire_ticks = u64::MAX;
    let mut no_buckets = AccelConfig::default();
    no_buckets.fbo_cache.max_per_size = 0;

    for config in [overflowing, no_buckets] {
        let mut screen = Screen::new(0);
        let backend = screen.backend();
        let err = axiom_accel::init(
            &mut screen,
            InitFlags::USE_SCREEN.bits(),
            Rc::new(HeadlessGl::default()),
            Box::new(NullRenderer),
            &config,
        )
        .unwrap_err();

        assert!(matches!(err, AccelError::InvalidConfig(_)), "{:?}", err);
        assert!(screen.accel().is_none());
        assert!(same(&screen.backend(), &backend));
        assert!(screen.event_loop.is_empty());
        assert!(!screen.privates.is_registered(PrivateScope::Screen));
    }
}

#[test]
fn test_picture_flag_needs_picture_screen() {
    let mut screen = Screen::without_picture(2);
    let err = init_with(&mut screen, InitFlags::USE_PICTURE_SCREEN).unwrap_err();
    assert_eq!(err, AccelError::NoPictureScreen(2));
    assert!(screen.accel().is_none());

    init_with(&mut screen, InitFlags::USE_SCREEN).unwrap();
    assert!(!screen.has_picture_screen());
}

#[test]
fn test_frozen_private_fails_registration() {
    let mut screen = Screen::new(0);
    screen.privates.freeze(PrivateScope::Pixmap);
    let err = init_with(&mut screen, InitFlags::USE_SCREEN).unwrap_err();
    assert_eq!(err, AccelError::Registration(PrivateScope::Pixmap));
    assert!(screen.accel().is_none());
    assert!(screen.event_loop.is_empty());
}

#[test]
fn test_block_handler_refusal_unwinds() {
    let mut screen = Screen::new(0);
    let backend = screen.backend();
    let picture = screen.picture_backend().unwrap();
    screen.event_loop.set_limit(Some(0));

    let err = init_with(&mut screen, InitFlags::USE_SCREEN | InitFlags::USE_PICTURE_SCREEN)
        .unwrap_err();
    assert_eq!(err, AccelError::BlockHandlerRegistration);
    assert!(screen.accel().is_none());
    assert!(same(&screen.backend(), &backend));
    assert!(same(&screen.picture_backend().unwrap(), &picture));
}

#[test]
fn test_unparsable_version_is_reported() {
    let mut screen = Screen::new(0);
    let err = axiom_accel::init(
        &mut screen,
        0,
        Rc::new(HeadlessGl::new("garbage")),
        Box::new(NullRenderer),
        &AccelConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err, AccelError::UnknownGlVersion("garbage".into()));
}

#[test]
fn test_close_releases_every_gl_object() {
    let gl = Rc::new(HeadlessGl::default());
    let mut screen = Screen::new(0);
    axiom_accel::init(
        &mut screen,
        InitFlags::USE_SCREEN.bits(),
        gl.clone(),
        Box::new(NullRenderer),
        &AccelConfig::default(),
    )
    .unwrap();

    let kept: Vec<_> = (0..4)
        .filter_map(|i| screen.create_pixmap(16 * (i + 1), 16, 32, PixmapUsage::Default))
        .collect();
    let pooled = screen.create_pixmap(300, 200, 24, PixmapUsage::Default).unwrap();
    screen.destroy_pixmap(pooled);
    assert_eq!(gl.stats().live_textures, 5);

    assert!(screen.close());
    assert_eq!(gl.stats().live_textures, 0);
    assert_eq!(gl.stats().live_framebuffers, 0);
    assert!(screen.is_closed());
    for id in kept {
        assert!(screen.pixmap(id).unwrap().binding().is_none());
    }
}

#[test]
fn test_fini_after_close_is_a_no_op() {
    let mut screen = Screen::new(0);
    init_with(&mut screen, InitFlags::USE_SCREEN).unwrap();
    assert!(screen.close());
    axiom_accel::fini(&mut screen);
    assert!(screen.accel().is_none());
}

#[test]
fn test_fini_without_screen_strategy() {
    let gl = Rc::new(HeadlessGl::default());
    let mut screen = Screen::new(0);
    axiom_accel::init(
        &mut screen,
        InitFlags::USE_PICTURE_SCREEN.bits(),
        gl.clone(),
        Box::new(NullRenderer),
        &AccelConfig::default(),
    )
    .unwrap();
    let id = axiom_accel::create_pixmap(&mut screen, 32, 32, 32, PixmapUsage::Default).unwrap();
    assert!(axiom_accel::pixmap::is_gpu_backed(&screen, id));

    axiom_accel::fini(&mut screen);
    assert!(screen.accel().is_none());
    assert_eq!(gl.stats().live_textures, 0);
    assert!(!screen.is_closed());
}

#[test]
fn test_renderer_lifecycle_and_dispatch() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let renderer = RecordingRenderer {
        calls: calls.clone(),
    };
    let mut screen = Screen::new(0);
    axiom_accel::init(
        &mut screen,
        (InitFlags::USE_SCREEN | InitFlags::USE_PICTURE_SCREEN).bits(),
        Rc::new(HeadlessGl::default()),
        Box::new(renderer),
        &AccelConfig::default(),
    )
    .unwrap();

    let gpu = screen.create_pixmap(16, 16, 32, PixmapUsage::Default).unwrap();
    let memory = screen.create_pixmap(16, 16, 32, PixmapUsage::Cpu).unwrap();
    let gpu_picture = screen
        .create_picture(Drawable::Pixmap(gpu), PictFormat::A8R8G8B8)
        .unwrap();
    let memory_picture = screen
        .create_picture(Drawable::Pixmap(memory), PictFormat::A8R8G8B8)
        .unwrap();

    let composite = |dst| CompositeArgs {
        op: PictOp::Over,
        src: memory_picture,
        mask: None,
        dst,
        src_origin: (0, 0),
        dst_origin: (0, 0),
        width: 8,
        height: 8,
    };
    screen.composite(&composite(gpu_picture));
    assert_eq!(screen.software_ops.composite, 0);
    screen.composite(&composite(memory_picture));
    assert_eq!(screen.software_ops.composite, 1);

    // Declined primitives fall back
    screen.trapezoids(&PrimitiveArgs {
        op: PictOp::Add,
        src: None,
        dst: gpu_picture,
        shapes: vec![Rect::new(0, 0, 4, 4)],
    });
    assert_eq!(screen.software_ops.trapezoids, 1);

    let pixels = screen.get_image(Drawable::Pixmap(gpu), Rect::new(0, 0, 2, 2));
    assert_eq!(pixels, vec![0xff; 16]);
    assert_eq!(screen.software_ops.get_image, 0);

    screen.unrealize_glyph(GlyphId(7));
    screen.close();

    let calls = calls.borrow();
    assert_eq!(calls[0], "init OpenGL true");
    assert!(calls[1].starts_with("composite on "));
    assert_eq!(calls[2], "unrealize 7");
    assert_eq!(&calls[3..], &["fini_glyphs".to_string(), "fini".to_string()]);
}
