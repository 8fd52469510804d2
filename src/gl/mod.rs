//! GL capability and resource interface
//!
//! The accelerated screen never calls GL directly. Everything it needs from
//! the driver goes through [`GlDispatch`]: version and extension queries at
//! init, flush/finish from the block handler, and texture/framebuffer
//! allocation for the FBO pool.
//!
//! Two implementations ship with the crate:
//! - [`headless::HeadlessGl`]: in-process bookkeeping, used by tests, the
//!   churn benchmark and the soak binary
//! - `native::NativeGl` (feature `native-gl`): the real driver through the
//!   `gl` crate

use std::fmt;

pub mod headless;
#[cfg(feature = "native-gl")]
pub mod native;

pub use headless::HeadlessGl;

pub const EXT_TEXTURE_FORMAT_BGRA8888: &str = "GL_EXT_texture_format_BGRA8888";
pub const MESA_PACK_INVERT: &str = "GL_MESA_pack_invert";
pub const EXT_FRAMEBUFFER_BLIT: &str = "GL_EXT_framebuffer_blit";

/// Which GL API the context speaks. Decided once at init from the version
/// string; behavior branches on this tag instead of build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlFlavor {
    Desktop,
    Es2,
}

impl GlFlavor {
    /// Lowest version the flavor can run on.
    pub fn minimum_version(self) -> GlVersion {
        match self {
            GlFlavor::Desktop => GlVersion::new(1, 3),
            GlFlavor::Es2 => GlVersion::new(2, 0),
        }
    }

    /// Extensions without which the flavor cannot back pixmaps.
    pub fn required_extensions(self) -> &'static [&'static str] {
        match self {
            GlFlavor::Desktop => &[],
            GlFlavor::Es2 => &[EXT_TEXTURE_FORMAT_BGRA8888],
        }
    }
}

impl fmt::Display for GlFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlFlavor::Desktop => write!(f, "OpenGL"),
            GlFlavor::Es2 => write!(f, "OpenGL ES"),
        }
    }
}

/// Major/minor API version. Ordering is lexicographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlVersion {
    pub major: u32,
    pub minor: u32,
}

impl GlVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for GlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Parses a `GL_VERSION` string into flavor and version.
///
/// Desktop drivers report `"<major>.<minor>[.<release>] <vendor info>"`,
/// GLES drivers report `"OpenGL ES <major>.<minor> <vendor info>"` (some
/// older ones use `"OpenGL ES-CM"`/`"OpenGL ES-CL"` profiles, which are
/// still GLES).
pub fn parse_version(version: &str) -> Option<(GlFlavor, GlVersion)> {
    let trimmed = version.trim();
    let (flavor, rest) = match trimmed.strip_prefix("OpenGL ES") {
        Some(rest) => {
            let rest = rest
                .strip_prefix("-CM")
                .or_else(|| rest.strip_prefix("-CL"))
                .unwrap_or(rest);
            (GlFlavor::Es2, rest.trim_start())
        }
        None => (GlFlavor::Desktop, trimmed),
    };

    let number = rest.split_whitespace().next()?;
    let mut parts = number.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor_digits: String = parts
        .next()?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let minor = minor_digits.parse().ok()?;

    Some((flavor, GlVersion::new(major, minor)))
}

/// Integer capabilities read at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlCap {
    MaxRenderbufferSize,
    MaxTextureSize,
}

/// Driver texture name. Zero is never a valid texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

/// Driver framebuffer name. Zero is the window-system framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub u32);

/// Texture storage chosen for a pixmap depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Single channel; depth 1 and 8 pixmaps.
    Alpha8,
    /// 16bpp visuals (depth 15 and 16).
    Rgb565,
    /// Depth 30 deep color.
    Rgb10A2,
    /// Depth 24 and 32.
    Bgra8,
}

impl TextureFormat {
    /// Picks the storage format for a pixmap depth, `None` when the depth
    /// cannot live in a texture.
    pub fn for_depth(depth: u8) -> Option<Self> {
        match depth {
            1 | 8 => Some(TextureFormat::Alpha8),
            15 | 16 => Some(TextureFormat::Rgb565),
            30 => Some(TextureFormat::Rgb10A2),
            24 | 32 => Some(TextureFormat::Bgra8),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Alpha8 => 1,
            TextureFormat::Rgb565 => 2,
            TextureFormat::Rgb10A2 | TextureFormat::Bgra8 => 4,
        }
    }
}

/// The slice of the GL dispatch table the lifecycle layer uses.
///
/// All methods take `&self`: the dispatch is shared between the screen
/// context and the event-loop block handler, and everything runs on the
/// server thread.
pub trait GlDispatch {
    /// Raw `GL_VERSION` string.
    fn version_string(&self) -> String;

    fn has_extension(&self, name: &str) -> bool;

    fn get_integer(&self, cap: GlCap) -> i32;

    fn flush(&self);

    fn finish(&self);

    /// Allocates texture storage, `None` when the driver is out of memory.
    fn create_texture(&self, width: u32, height: u32, format: TextureFormat)
        -> Option<TextureHandle>;

    fn delete_texture(&self, texture: TextureHandle);

    /// Creates a framebuffer with `texture` as color attachment. `None` when
    /// the texture is unknown or the framebuffer is incomplete.
    fn create_framebuffer(&self, texture: TextureHandle) -> Option<FramebufferHandle>;

    fn delete_framebuffer(&self, framebuffer: FramebufferHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_desktop_version() {
        assert_eq!(
            parse_version("4.6.0 NVIDIA 535.54.03"),
            Some((GlFlavor::Desktop, GlVersion::new(4, 6)))
        );
        assert_eq!(
            parse_version("1.3 Mesa 7.10"),
            Some((GlFlavor::Desktop, GlVersion::new(1, 3)))
        );
    }

    #[test]
    fn test_parse_es_version() {
        assert_eq!(
            parse_version("OpenGL ES 3.2 Mesa 23.1.4"),
            Some((GlFlavor::Es2, GlVersion::new(3, 2)))
        );
        assert_eq!(
            parse_version("OpenGL ES-CM 1.1"),
            Some((GlFlavor::Es2, GlVersion::new(1, 1)))
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_version(""), None);
        assert_eq!(parse_version("OpenGL ES"), None);
        assert_eq!(parse_version("four point six"), None);
        assert_eq!(parse_version("4"), None);
    }

    #[test]
    fn test_flavor_minimums() {
        assert!(GlVersion::new(1, 2) < GlFlavor::Desktop.minimum_version());
        assert!(GlVersion::new(2, 0) >= GlFlavor::Es2.minimum_version());
        assert!(GlFlavor::Desktop.required_extensions().is_empty());
        assert_eq!(
            GlFlavor::Es2.required_extensions(),
            &[EXT_TEXTURE_FORMAT_BGRA8888]
        );
    }

    #[test]
    fn test_texture_format_for_depth() {
        assert_eq!(TextureFormat::for_depth(24), Some(TextureFormat::Bgra8));
        assert_eq!(TextureFormat::for_depth(8), Some(TextureFormat::Alpha8));
        assert_eq!(TextureFormat::for_depth(4), None);
        assert_eq!(TextureFormat::Rgb565.bytes_per_pixel(), 2);
    }
}
