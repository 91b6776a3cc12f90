//! Idempotent exposure of host callables into the page.
//!
//! Strategy: a host-side set of names known live for the current page
//! instance, a defensive page probe for the window between a navigation and
//! the host noticing it, and explicit cache invalidation on every observed
//! navigation. Re-exposing an already-live name is a no-op, not an error.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::page::{PageContext, PageError};

/// Tracks which named bindings are live in the current page instance.
///
/// All mutation goes through [`expose_if_absent`](Self::expose_if_absent) and
/// the invalidation methods; the set is never handed out mutably.
pub struct BindingRegistry {
    live: Mutex<HashSet<String>>,
    /// Serializes probe/retract/add sequences so overlapping callers cannot
    /// interleave them (one caller's retract must not race another's add).
    expose_guard: tokio::sync::Mutex<()>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashSet::new()),
            expose_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Expose `name` into the page unless it is already live.
    ///
    /// Safe against repeated calls, reloads, racing callers and a page that
    /// closed under us:
    /// - cached-live or closed page: immediate no-op;
    /// - a name that already resolves to a callable in the page is adopted
    ///   into the cache without re-exposing;
    /// - otherwise any stale registration is retracted best-effort, the
    ///   binding is added, and a duplicate error from a racing caller is
    ///   treated as success.
    pub async fn expose_if_absent(
        &self,
        page: &dyn PageContext,
        name: &str,
    ) -> Result<(), PageError> {
        if self.is_live(name) {
            return Ok(());
        }
        if page.is_closed() {
            // Racing a navigation or teardown; the caller re-runs injection
            // when a usable page appears.
            return Ok(());
        }

        let _guard = self.expose_guard.lock().await;
        // A concurrent caller may have finished while we waited on the guard.
        if self.is_live(name) {
            return Ok(());
        }

        // Defensive probe: a previous session of this host (or a racing
        // caller) may have exposed the name already.
        let probe = format!("typeof window[{}] === 'function'", js_string(name));
        if let Ok(serde_json::Value::Bool(true)) = page.evaluate(&probe).await {
            self.record(name);
            return Ok(());
        }

        // Retract any stale registration first. Removal of a binding that
        // does not exist fails harmlessly.
        if let Err(err) = page.remove_binding(name).await {
            tracing::debug!(binding = name, error = %err, "stale retract failed (expected)");
        }

        match page.add_binding(name).await {
            Ok(()) => {
                self.record(name);
                Ok(())
            }
            Err(PageError::DuplicateBinding { .. }) => {
                // Another caller won the race; the binding exists.
                tracing::debug!(binding = name, "binding created concurrently, adopting");
                self.record(name);
                Ok(())
            }
            Err(PageError::Closed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drop one name from the live cache (e.g. a probe found it missing).
    pub fn invalidate(&self, name: &str) {
        self.live.lock().unwrap().remove(name);
    }

    /// Drop the whole cache. Must be called on every page navigation: the
    /// page silently forgets its bindings, the host must not remember them.
    pub fn invalidate_all(&self) {
        self.live.lock().unwrap().clear();
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.live.lock().unwrap().contains(name)
    }

    pub fn len(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().unwrap().is_empty()
    }

    /// Snapshot of the names currently believed live, for liveness probing.
    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.live.lock().unwrap().iter().cloned().collect();
        names.sort();
        names
    }

    fn record(&self, name: &str) {
        self.live.lock().unwrap().insert(name.to_string());
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Quote a string for embedding in a script.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    #[tokio::test]
    async fn expose_is_idempotent() {
        let page = FakePage::new();
        let registry = BindingRegistry::new();

        registry.expose_if_absent(&page, "onThing").await.unwrap();
        registry.expose_if_absent(&page, "onThing").await.unwrap();
        registry.expose_if_absent(&page, "onThing").await.unwrap();

        assert_eq!(page.add_binding_calls().len(), 1);
        assert!(registry.is_live("onThing"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_race_is_swallowed_and_recorded() {
        let page = FakePage::new();
        let registry = BindingRegistry::new();
        page.fail_next_add_as_duplicate("onThing");

        registry.expose_if_absent(&page, "onThing").await.unwrap();
        assert!(registry.is_live("onThing"));

        // And the now-live cache short-circuits the next call entirely.
        registry.expose_if_absent(&page, "onThing").await.unwrap();
        assert_eq!(page.add_binding_calls().len(), 1);
    }

    #[tokio::test]
    async fn closed_page_is_a_noop() {
        let page = FakePage::new();
        page.mark_closed();
        let registry = BindingRegistry::new();

        registry.expose_if_absent(&page, "onThing").await.unwrap();
        assert!(!registry.is_live("onThing"));
        assert!(page.add_binding_calls().is_empty());
    }

    #[tokio::test]
    async fn page_probe_adopts_existing_callable() {
        let page = FakePage::new();
        page.respond_with("typeof window[\"onThing\"]", serde_json::json!(true));
        let registry = BindingRegistry::new();

        registry.expose_if_absent(&page, "onThing").await.unwrap();
        assert!(registry.is_live("onThing"));
        // Adopted, never re-exposed.
        assert!(page.add_binding_calls().is_empty());
    }

    #[tokio::test]
    async fn stale_retract_errors_are_ignored() {
        let page = FakePage::new();
        let registry = BindingRegistry::new();

        // No binding exists, so remove_binding fails; exposure proceeds.
        registry.expose_if_absent(&page, "onThing").await.unwrap();
        assert_eq!(page.remove_binding_calls(), vec!["onThing"]);
        assert_eq!(page.live_bindings(), vec!["onThing"]);
    }

    #[tokio::test]
    async fn navigation_invalidation_rederives_liveness() {
        let page = FakePage::new();
        let registry = BindingRegistry::new();

        registry.expose_if_absent(&page, "onThing").await.unwrap();

        // Navigation: page forgets, host is told.
        page.drop_all_bindings();
        registry.invalidate_all();
        assert!(registry.is_empty());

        registry.expose_if_absent(&page, "onThing").await.unwrap();
        assert_eq!(page.add_binding_calls().len(), 2);
        assert_eq!(page.live_bindings(), vec!["onThing"]);
    }

    #[tokio::test]
    async fn overlapping_exposures_produce_one_binding() {
        use std::sync::Arc;

        let page = Arc::new(FakePage::new());
        let registry = Arc::new(BindingRegistry::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let page = Arc::clone(&page);
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.expose_if_absent(page.as_ref(), "onThing").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(page.live_bindings(), vec!["onThing"]);
        assert!(registry.is_live("onThing"));
    }

    #[test]
    fn live_names_sorted_snapshot() {
        let registry = BindingRegistry::new();
        registry.record("zeta");
        registry.record("alpha");
        assert_eq!(registry.live_names(), vec!["alpha", "zeta"]);
    }
}
