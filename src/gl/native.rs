//! GL dispatch over a real driver context
//!
//! The caller owns the context and must keep it current on the server thread
//! for as long as the dispatch lives.

use super::{
    parse_version, FramebufferHandle, GlCap, GlDispatch, GlFlavor, TextureFormat, TextureHandle,
};
use log::{debug, warn};
use std::collections::HashSet;
use std::ffi::{c_void, CStr};

/// Not exported by the core-profile bindings, still accepted by GLES2 and
/// compatibility contexts.
const GL_ALPHA: gl::types::GLenum = 0x1906;

/// [`GlDispatch`] backed by function pointers loaded through the `gl` crate.
pub struct NativeGl {
    version: String,
    flavor: GlFlavor,
    extensions: HashSet<String>,
}

impl NativeGl {
    /// Loads entry points with `loader` (for example `eglGetProcAddress`) and
    /// snapshots the version and extension strings.
    pub fn load<F>(mut loader: F) -> Option<Self>
    where
        F: FnMut(&str) -> *const c_void,
    {
        gl::load_with(|symbol| loader(symbol));

        let version = get_string(gl::VERSION)?;
        let (flavor, _) = parse_version(&version)?;
        let extensions = query_extensions();
        debug!(
            "native GL: {} ({} extensions, flavor {})",
            version,
            extensions.len(),
            flavor
        );

        Some(Self {
            version,
            flavor,
            extensions,
        })
    }

    pub fn flavor(&self) -> GlFlavor {
        self.flavor
    }

    fn texture_layout(
        &self,
        format: TextureFormat,
    ) -> (gl::types::GLint, gl::types::GLenum, gl::types::GLenum) {
        match (format, self.flavor) {
            (TextureFormat::Alpha8, _) => (GL_ALPHA as i32, GL_ALPHA, gl::UNSIGNED_BYTE),
            (TextureFormat::Rgb565, _) => (gl::RGB as i32, gl::RGB, gl::UNSIGNED_SHORT_5_6_5),
            (TextureFormat::Rgb10A2, GlFlavor::Desktop) => {
                (gl::RGB10_A2 as i32, gl::BGRA, gl::UNSIGNED_INT_2_10_10_10_REV)
            }
            (TextureFormat::Rgb10A2, GlFlavor::Es2) => {
                (gl::RGBA as i32, gl::RGBA, gl::UNSIGNED_INT_2_10_10_10_REV)
            }
            (TextureFormat::Bgra8, GlFlavor::Desktop) => {
                (gl::RGBA as i32, gl::BGRA, gl::UNSIGNED_INT_8_8_8_8_REV)
            }
            // GL_EXT_texture_format_BGRA8888 requires internalformat == format
            (TextureFormat::Bgra8, GlFlavor::Es2) => (gl::BGRA as i32, gl::BGRA, gl::UNSIGNED_BYTE),
        }
    }
}

fn get_string(name: gl::types::GLenum) -> Option<String> {
    // SAFETY: the caller keeps a context current; GetString returns a static
    // NUL-terminated string or null.
    unsafe {
        let ptr = gl::GetString(name);
        if ptr.is_null() {
            return None;
        }
        Some(CStr::from_ptr(ptr.cast()).to_string_lossy().into_owned())
    }
}

fn query_extensions() -> HashSet<String> {
    if let Some(list) = get_string(gl::EXTENSIONS) {
        return list.split_whitespace().map(str::to_string).collect();
    }

    // Core profiles drop GL_EXTENSIONS from GetString
    let mut count = 0;
    // SAFETY: context is current; count is a valid out pointer.
    unsafe {
        gl::GetError();
        gl::GetIntegerv(gl::NUM_EXTENSIONS, &mut count);
    }
    (0..count.max(0) as u32)
        .filter_map(|index| {
            // SAFETY: index is below NUM_EXTENSIONS.
            unsafe {
                let ptr = gl::GetStringi(gl::EXTENSIONS, index);
                (!ptr.is_null())
                    .then(|| CStr::from_ptr(ptr.cast()).to_string_lossy().into_owned())
            }
        })
        .collect()
}

impl GlDispatch for NativeGl {
    fn version_string(&self) -> String {
        self.version.clone()
    }

    fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    fn get_integer(&self, cap: GlCap) -> i32 {
        let pname = match cap {
            GlCap::MaxRenderbufferSize => gl::MAX_RENDERBUFFER_SIZE,
            GlCap::MaxTextureSize => gl::MAX_TEXTURE_SIZE,
        };
        let mut value = 0;
        // SAFETY: context is current; value is a valid out pointer.
        unsafe { gl::GetIntegerv(pname, &mut value) };
        value
    }

    fn flush(&self) {
        // SAFETY: context is current.
        unsafe { gl::Flush() };
    }

    fn finish(&self) {
        // SAFETY: context is current.
        unsafe { gl::Finish() };
    }

    fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Option<TextureHandle> {
        let (internal, pixel_format, pixel_type) = self.texture_layout(format);
        let mut name = 0;
        // SAFETY: context is current; no client memory is passed to
        // TexImage2D (null data pointer allocates storage only).
        unsafe {
            gl::GetError();
            gl::GenTextures(1, &mut name);
            gl::BindTexture(gl::TEXTURE_2D, name);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::NEAREST as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::NEAREST as i32);
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                internal,
                width as i32,
                height as i32,
                0,
                pixel_format,
                pixel_type,
                std::ptr::null(),
            );
            gl::BindTexture(gl::TEXTURE_2D, 0);

            let error = gl::GetError();
            if error != gl::NO_ERROR {
                warn!("native GL: texture {}x{} {:?} failed: {:#x}", width, height, format, error);
                gl::DeleteTextures(1, &name);
                return None;
            }
        }
        Some(TextureHandle(name))
    }

    fn delete_texture(&self, texture: TextureHandle) {
        // SAFETY: context is current; deleting an unknown name is ignored.
        unsafe { gl::DeleteTextures(1, &texture.0) };
    }

    fn create_framebuffer(&self, texture: TextureHandle) -> Option<FramebufferHandle> {
        let mut name = 0;
        // SAFETY: context is current.
        unsafe {
            gl::GenFramebuffers(1, &mut name);
            gl::BindFramebuffer(gl::FRAMEBUFFER, name);
            gl::FramebufferTexture2D(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                texture.0,
                0,
            );
            let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);

            if status != gl::FRAMEBUFFER_COMPLETE {
                warn!("native GL: framebuffer for texture {} incomplete: {:#x}", texture.0, status);
                gl::DeleteFramebuffers(1, &name);
                return None;
            }
        }
        Some(FramebufferHandle(name))
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferHandle) {
        // SAFETY: context is current.
        unsafe { gl::DeleteFramebuffers(1, &framebuffer.0) };
    }
}
