//! # Axiom Accel
//!
//! GPU pixmap backing and screen lifecycle for Axiom's X11 acceleration path.
//!
//! ## Architecture
//!
//! - `screen`: per-screen context, init/close/fini and the block handler
//! - `pixmap`: pixmap-to-FBO bindings and GPU/CPU allocation decisions
//! - `fbo`: FBO creation, the free pool and expiry
//! - `backend`: accelerated screen and picture strategies
//! - `render`: the renderer collaborator trait
//! - `gl`: GL dispatch trait, headless and native implementations
//! - `host`: the display-server model and its software path
//! - `config`: TOML and environment configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use axiom_accel::{host::{PixmapUsage, Screen}, AccelConfig, HeadlessGl, NullRenderer};
//! use std::rc::Rc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AccelConfig::from_env();
//!     let mut screen = Screen::new(0);
//!     axiom_accel::init(
//!         &mut screen,
//!         config.screen.init_flags().bits(),
//!         Rc::new(HeadlessGl::default()),
//!         Box::new(NullRenderer),
//!         &config,
//!     )?;
//!
//!     let pixmap = screen.create_pixmap(256, 256, 32, PixmapUsage::Default);
//!     axiom_accel::block_handler(&mut screen);
//!     screen.close();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod fbo;
pub mod gl;
pub mod host;
pub mod pixmap;
pub mod render;
pub mod screen;

// Re-export main types for easy access
pub use config::AccelConfig;
pub use error::{AccelError, AccelResult};
pub use fbo::{Fbo, FboFlags, FboStats};
pub use gl::{GlDispatch, GlFlavor, HeadlessGl};
pub use pixmap::{
    create_pixmap, destroy_pixmap, resolve_backing_surface, set_pixmap_texture, set_pixmap_type,
    set_screen_pixmap, PixmapBinding, PixmapType,
};
pub use render::{AccelRenderer, NullRenderer, RenderOp, RenderOutcome};
pub use screen::{block_handler, close_screen, fini, init, Capabilities, InitFlags, ScreenContext};

// Re-export common error types
pub use anyhow::{Context, Error, Result};

/// Version information for Axiom Accel
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
