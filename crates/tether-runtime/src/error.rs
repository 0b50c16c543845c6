#![forbid(unsafe_code)]

use thiserror::Error;

/// Boxed error returned by a user render function.
pub type BoxError = Box<dyn std::error::Error + 'static>;

pub type Result<T> = std::result::Result<T, ObserverError>;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("observer `{name}` rendered re-entrantly from inside its own render")]
    ReentrantRender { name: String },

    #[error("observer `{name}` rendered after unmount")]
    RenderAfterUnmount { name: String },

    #[error("observer body supplies both `children` and `render`; use only one")]
    ConflictingObserverBody,

    #[error("observer body supplies neither `children` nor `render`")]
    MissingObserverBody,

    #[error("render of observer `{name}` failed: {source}")]
    Render {
        name: String,
        #[source]
        source: BoxError,
    },
}

impl ObserverError {
    /// Name of the observer the error belongs to, when there is one.
    #[must_use]
    pub fn observer_name(&self) -> Option<&str> {
        match self {
            Self::ReentrantRender { name }
            | Self::RenderAfterUnmount { name }
            | Self::Render { name, .. } => Some(name),
            Self::ConflictingObserverBody | Self::MissingObserverBody => None,
        }
    }

    /// Whether this is a failure of the user render function rather than a
    /// misuse of the runtime.
    #[must_use]
    pub fn is_render_failure(&self) -> bool {
        matches!(self, Self::Render { .. })
    }
}
