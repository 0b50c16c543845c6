#![forbid(unsafe_code)]

//! The `Observer` element form: a render function passed as either
//! `children` or `render`, never both.

use crate::error::{ObserverError, Result};

#[derive(Debug, Clone)]
pub struct ObserverBody<F> {
    pub children: Option<F>,
    pub render: Option<F>,
}

impl<F> Default for ObserverBody<F> {
    fn default() -> Self {
        Self {
            children: None,
            render: None,
        }
    }
}

impl<F> ObserverBody<F> {
    #[must_use]
    pub fn children(f: F) -> Self {
        Self {
            children: Some(f),
            render: None,
        }
    }

    #[must_use]
    pub fn render(f: F) -> Self {
        Self {
            children: None,
            render: Some(f),
        }
    }

    /// The single render function, or the reason there is not exactly one.
    pub fn resolve(self) -> Result<F> {
        match (self.children, self.render) {
            (Some(_), Some(_)) => Err(ObserverError::ConflictingObserverBody),
            (Some(f), None) | (None, Some(f)) => Ok(f),
            (None, None) => Err(ObserverError::MissingObserverBody),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_body_is_accepted() {
        assert_eq!(ObserverBody::children(1).resolve().ok(), Some(1));
        assert_eq!(ObserverBody::render(2).resolve().ok(), Some(2));
    }

    #[test]
    fn both_bodies_conflict() {
        let body = ObserverBody {
            children: Some(1),
            render: Some(2),
        };
        assert!(matches!(
            body.resolve(),
            Err(ObserverError::ConflictingObserverBody)
        ));
    }

    #[test]
    fn no_body_is_missing() {
        let body: ObserverBody<fn()> = ObserverBody::default();
        assert!(matches!(body.resolve(), Err(ObserverError::MissingObserverBody)));
    }
}
