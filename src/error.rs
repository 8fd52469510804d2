//! Error types for screen initialization
//!
//! Only screen bring-up reports errors. Per-pixmap GPU failures never surface
//! as errors: they degrade to CPU-backed storage and are logged instead.

use crate::gl::{GlFlavor, GlVersion};
use crate::host::PrivateScope;
use thiserror::Error;

/// Reasons [`crate::screen::init`] can refuse to bring up acceleration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccelError {
    /// Flag bits outside the known set were passed.
    #[error("invalid init flags {0:#x}")]
    InvalidFlags(u32),

    /// Picture hooks were requested on a screen without picture support.
    #[error("screen {0} has no picture screen to accelerate")]
    NoPictureScreen(usize),

    /// The host refused a private key registration.
    #[error("failed to allocate {0:?} private")]
    Registration(PrivateScope),

    /// The context reports an API version below the flavor's minimum.
    #[error("{flavor} {required} or later required, found {found}")]
    UnsupportedGlVersion {
        flavor: GlFlavor,
        required: GlVersion,
        found: GlVersion,
    },

    /// The version string could not be parsed at all.
    #[error("unrecognized GL version string {0:?}")]
    UnknownGlVersion(String),

    /// A mandatory extension is missing.
    #[error("{0} required")]
    MissingExtension(&'static str),

    /// The host event loop refused the block/wakeup handler pair.
    #[error("failed to register block and wakeup handlers")]
    BlockHandlerRegistration,

    /// Acceleration is already installed on this screen.
    #[error("screen {0} is already accelerated")]
    AlreadyInitialized(usize),

    /// The acceleration config failed validation.
    #[error("invalid acceleration config: {0}")]
    InvalidConfig(String),
}

pub type AccelResult<T> = std::result::Result<T, AccelError>;
