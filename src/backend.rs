//! Selection between the reference and accelerated implementations.
//!
//! The smoother and the projector each come in two variants with identical
//! output semantics. A single configuration flag chooses between them at
//! construction time. The accelerated variants are compiled only with the
//! `accelerated` cargo feature; asking for them in a build without it is a
//! configuration error that is recovered locally.

/// Implementation family for swappable components.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Reference,
    Accelerated,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Reference => "reference",
            BackendKind::Accelerated => "accelerated",
        }
    }
}

/// True when the accelerated backends were compiled in.
pub const fn accelerated_available() -> bool {
    cfg!(feature = "accelerated")
}

/// Resolve the backend for `component`, falling back to the reference
/// implementation (with a warning) when acceleration is unavailable.
pub fn select_backend(use_accelerated: bool, component: &str) -> BackendKind {
    resolve(use_accelerated, accelerated_available(), component)
}

fn resolve(use_accelerated: bool, available: bool, component: &str) -> BackendKind {
    match (use_accelerated, available) {
        (true, true) => {
            log::info!("accelerated core enabled for {}", component);
            BackendKind::Accelerated
        }
        (true, false) => {
            log::warn!(
                "accelerated core requested for {} but not built; falling back to reference",
                component
            );
            BackendKind::Reference
        }
        (false, _) => {
            log::info!("using reference {} (accelerated core disabled)", component);
            BackendKind::Reference
        }
    }
}
