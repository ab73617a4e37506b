//! Per-process view registry.
//!
//! Singleton acquisition: per `(layout type, domain)` one view is
//! constructed lazily behind a process-local lock and reused afterwards.
//! The registry is an explicit object owned by the program entry point —
//! there is no module-level cache.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::control::Side;
use crate::view::{RegionLayout, RegionView};

type Key = (TypeId, Option<PathBuf>);

/// Process-wide cache of opened views, keyed by layout type and domain.
pub struct ViewRegistry {
    side: Side,
    views: Mutex<HashMap<Key, Arc<dyn Any + Send + Sync>>>,
}

impl ViewRegistry {
    /// A registry for a host-side process. Opens require a domain.
    pub fn new_host() -> Self {
        Self::new(Side::Host)
    }

    /// A registry for a guest-side process. There is only one launcher from
    /// the guest's point of view, so opens take no domain.
    pub fn new_guest() -> Self {
        Self::new(Side::Guest)
    }

    fn new(side: Side) -> Self {
        Self {
            side,
            views: Mutex::new(HashMap::new()),
        }
    }

    /// The side this registry opens for.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Return the cached view for `(L, domain)`, opening it on first use.
    ///
    /// The contract is nullable: a failed open returns `None` and leaves the
    /// slot empty, so a later call retries. On the host `domain` is
    /// required; on the guest it must be absent.
    pub fn get_instance<L: RegionLayout>(
        &self,
        domain: Option<&Path>,
    ) -> Option<Arc<RegionView<L>>> {
        let key = (TypeId::of::<L>(), domain.map(Path::to_path_buf));
        // The lock is held across the open: acquisitions are serialized by
        // design, so two racing callers cannot construct twice.
        let mut views = self.views.lock();
        if let Some(cached) = views.get(&key) {
            return Arc::clone(cached).downcast::<RegionView<L>>().ok();
        }

        let opened = match (self.side, domain) {
            (Side::Host, Some(domain)) => RegionView::<L>::open_host(domain),
            (Side::Host, None) => {
                tracing::warn!(
                    region = L::REGION_NAME,
                    "host-side get_instance requires a domain"
                );
                return None;
            }
            (Side::Guest, None) => RegionView::<L>::open_guest(),
            (Side::Guest, Some(_)) => {
                tracing::warn!(
                    region = L::REGION_NAME,
                    "guest-side get_instance takes no domain"
                );
                return None;
            }
        };

        match opened {
            Ok(view) => {
                let view = Arc::new(view);
                views.insert(key, view.clone());
                Some(view)
            }
            Err(e) => {
                tracing::warn!(region = L::REGION_NAME, "open failed: {}", e);
                None
            }
        }
    }
}

impl std::fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewRegistry")
            .field("side", &self.side)
            .field("cached", &self.views.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NowhereLayout;
    // SAFETY: zero-sized, nothing to initialize or race on.
    unsafe impl RegionLayout for NowhereLayout {
        const REGION_NAME: &'static str = "nowhere";
    }

    #[test]
    fn failed_open_does_not_populate() {
        let registry = ViewRegistry::new_host();
        // No server at this domain: ServerUnreachable, not fatal.
        let domain = Path::new("/nonexistent/vsoc-test-domain");
        assert!(registry.get_instance::<NowhereLayout>(Some(domain)).is_none());
        assert_eq!(registry.views.lock().len(), 0);
    }

    #[test]
    fn host_requires_a_domain() {
        let registry = ViewRegistry::new_host();
        assert!(registry.get_instance::<NowhereLayout>(None).is_none());
    }

    #[test]
    fn guest_rejects_a_domain() {
        let registry = ViewRegistry::new_guest();
        let domain = Path::new("/tmp");
        assert!(registry.get_instance::<NowhereLayout>(Some(domain)).is_none());
    }
}
