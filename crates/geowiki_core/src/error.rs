use std::fmt;

/// Entity kinds that can be looked up by slug or id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Region,
    Page,
    Tag,
    FrontPage,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::Page => "page",
            Self::Tag => "tag",
            Self::FrontPage => "front page",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failures surfaced through `anyhow::Error`; callers `downcast_ref` to branch on them.
#[derive(Debug, thiserror::Error)]
pub enum GeowikiError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: EntityKind, key: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid geometry: {0}")]
    Geometry(String),
}

impl GeowikiError {
    pub fn not_found(kind: EntityKind, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }
}

/// True when `error` (or anything in its context chain) is a `NotFound`.
pub fn is_not_found(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<GeowikiError>(),
            Some(GeowikiError::NotFound { .. })
        )
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn not_found_survives_context_wrapping() {
        let result: anyhow::Result<()> = Err(GeowikiError::not_found(EntityKind::Tag, "shelter").into());
        let error = result.context("failed to build tag map").expect_err("must fail");
        assert!(is_not_found(&error));
        assert!(format!("{error:#}").contains("tag not found: shelter"));
    }

    #[test]
    fn validation_is_not_a_not_found() {
        let error = anyhow::Error::from(GeowikiError::Validation("bad bbox".to_string()));
        assert!(!is_not_found(&error));
    }
}
