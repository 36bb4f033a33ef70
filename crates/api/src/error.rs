//! Gridmesh error types.

use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The core gridmesh error type. This type is used in all external
/// gridmesh apis as well as internally in the module implementations.
///
/// This type is required to implement `Clone` so that finished futures
/// can hand the same `Result` to every registered listener.
///
/// The non-generic variants carry the failure taxonomy that callers are
/// expected to branch on: timeouts are retryable at a higher level,
/// segmentation is fatal for the local node, and configuration errors
/// abort startup before anything is partially initialized.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MeshError {
    /// Generic gridmesh internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// An operation did not complete within its configured timeout.
    #[error("timeout: {ctx}")]
    Timeout {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// The local node lost quorum and stopped serving. Not auto-healed.
    #[error("segmented: {ctx}")]
    Segmented {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// Invalid or missing configuration. Raised at startup, never after.
    #[error("config: {ctx}")]
    Config {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },
}

impl MeshError {
    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct a timeout error.
    pub fn timeout<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Timeout {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct a segmentation error.
    pub fn segmented<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Segmented {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct a configuration error.
    pub fn config<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Config {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// `true` if this is a [MeshError::Timeout].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// `true` if this is a [MeshError::Segmented].
    pub fn is_segmented(&self) -> bool {
        matches!(self, Self::Segmented { .. })
    }
}

/// The core gridmesh result type.
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            "bla (src: None)",
            MeshError::other("bla").to_string().as_str(),
        );
        assert_eq!(
            "foo (src: bar)",
            MeshError::other_src("foo", std::io::Error::other("bar"))
                .to_string()
                .as_str(),
        );
        assert_eq!(
            "timeout: join",
            MeshError::timeout("join").to_string().as_str(),
        );
        assert_eq!(
            "segmented: lost quorum",
            MeshError::segmented("lost quorum").to_string().as_str(),
        );
    }

    #[test]
    fn error_taxonomy() {
        assert!(MeshError::timeout("t").is_timeout());
        assert!(!MeshError::other("o").is_timeout());
        assert!(MeshError::segmented("s").is_segmented());
        assert!(!MeshError::config("c").is_segmented());
    }

    #[test]
    fn ensure_mesh_error_type_is_send_and_sync() {
        fn ensure<T: std::fmt::Display + Send + Sync>(_t: T) {}
        ensure(MeshError::other("bla"));
    }
}
