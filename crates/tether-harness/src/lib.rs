#![forbid(unsafe_code)]

//! Simulated host renderer for exercising tether.
//!
//! [`TestHost`] plays the part of a component-tree renderer: it starts
//! render attempts, commits or abandons them, queues the update requests
//! observers send it, and re-renders mounted components when flushed. Time is
//! a [`LabClock`], so cleanup windows can be crossed deterministically.
//!
//! Strict mode mirrors a renderer that renders every new instance twice and
//! throws the first attempt away.
//!
//! ```
//! use tether_core::Observable;
//! use tether_harness::{Component, TestHost};
//!
//! let count = Observable::named("count", 1);
//! let source = count.clone();
//! let mut host = TestHost::with_finalization();
//! host.mount("counter", Component::new("Counter", move || format!("count={}", source.get())))
//!     .unwrap();
//!
//! count.set(2);
//! assert_eq!(host.request_count(), 1);
//! host.flush().unwrap();
//! assert_eq!(host.output("counter"), Some("count=2"));
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use tether_core::{Clock, LabClock};
use tether_runtime::{
    BoxError, CleanupConfig, ObserverInstance, ObserverState, ReactionTrackingRegistry,
    StrategyKind, TrackingRecord,
};
use tracing::debug;

type RenderFn = Rc<dyn Fn() -> Result<String, BoxError>>;

/// A render function plus the component name observers report.
#[derive(Clone)]
pub struct Component {
    name: String,
    render: RenderFn,
}

impl Component {
    pub fn new(name: impl Into<String>, render: impl Fn() -> String + 'static) -> Self {
        Self {
            name: name.into(),
            render: Rc::new(move || Ok(render())),
        }
    }

    /// A component whose render can fail.
    pub fn fallible(
        name: impl Into<String>,
        render: impl Fn() -> Result<String, BoxError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            render: Rc::new(render),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component").field("name", &self.name).finish()
    }
}

/// A rendered but uncommitted instance. Dropping it abandons the render.
pub struct RenderAttempt {
    key: String,
    component: Component,
    instance: ObserverInstance,
    output: String,
}

impl RenderAttempt {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    #[must_use]
    pub fn instance(&self) -> &ObserverInstance {
        &self.instance
    }

    /// The attempt's tracking record, if it still has one.
    #[must_use]
    pub fn record(&self) -> Option<Rc<TrackingRecord>> {
        self.instance.record()
    }
}

impl std::fmt::Debug for RenderAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderAttempt")
            .field("key", &self.key)
            .field("output", &self.output)
            .field("state", &self.instance.state())
            .finish()
    }
}

struct Mounted {
    component: Component,
    instance: ObserverInstance,
    output: String,
}

pub struct TestHost {
    registry: Rc<ReactionTrackingRegistry>,
    lab: LabClock,
    strict_mode: bool,
    mounted: BTreeMap<String, Mounted>,
    requests: Rc<RefCell<Vec<String>>>,
    discarded_attempts: usize,
}

impl TestHost {
    fn with_registry(registry: ReactionTrackingRegistry, lab: LabClock) -> Self {
        Self {
            registry: Rc::new(registry),
            lab,
            strict_mode: false,
            mounted: BTreeMap::new(),
            requests: Rc::new(RefCell::new(Vec::new())),
            discarded_attempts: 0,
        }
    }

    /// A host whose registry reclaims records when attempts are dropped.
    #[must_use]
    pub fn with_finalization() -> Self {
        Self::with_registry(ReactionTrackingRegistry::finalization(), LabClock::new())
    }

    /// A host whose registry scans for expired records on the lab clock.
    #[must_use]
    pub fn with_timer(config: &CleanupConfig) -> Self {
        let lab = LabClock::new();
        let registry = ReactionTrackingRegistry::timer(config, Clock::lab(&lab));
        Self::with_registry(registry, lab)
    }

    /// Render every new instance twice, discarding the first attempt.
    #[must_use]
    pub fn strict(mut self, enabled: bool) -> Self {
        self.strict_mode = enabled;
        self
    }

    #[must_use]
    pub fn strategy(&self) -> StrategyKind {
        self.registry.kind()
    }

    #[must_use]
    pub fn registry(&self) -> &Rc<ReactionTrackingRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn clock(&self) -> &LabClock {
        &self.lab
    }

    fn new_instance(&self, key: &str, component: &Component) -> ObserverInstance {
        let requests = Rc::clone(&self.requests);
        let key = key.to_string();
        ObserverInstance::with_registry(
            component.name(),
            move || requests.borrow_mut().push(key.clone()),
            Rc::clone(&self.registry),
        )
    }

    fn attempt(&self, key: &str, component: &Component) -> tether_runtime::Result<RenderAttempt> {
        let instance = self.new_instance(key, component);
        let render = Rc::clone(&component.render);
        let output = instance.observed_render(move || render())?;
        Ok(RenderAttempt {
            key: key.to_string(),
            component: component.clone(),
            instance,
            output,
        })
    }

    /// Start a render of a new instance without committing it.
    ///
    /// In strict mode an extra attempt is rendered first and dropped.
    pub fn render(&mut self, key: &str, component: &Component) -> tether_runtime::Result<RenderAttempt> {
        if self.strict_mode {
            let discarded = self.attempt(key, component)?;
            debug!(key, "strict mode: discarding first render attempt");
            drop(discarded);
            self.discarded_attempts += 1;
        }
        self.attempt(key, component)
    }

    /// Commit an attempt, replacing (and unmounting) whatever was mounted
    /// under the same key.
    pub fn commit(&mut self, attempt: RenderAttempt) {
        let RenderAttempt {
            key,
            component,
            instance,
            output,
        } = attempt;
        instance.committed();
        debug!(key = %key, "committed");
        if let Some(previous) = self.mounted.insert(
            key,
            Mounted {
                component,
                instance,
                output,
            },
        ) {
            previous.instance.unmount();
        }
    }

    /// Render and commit in one step. Returns the committed output.
    pub fn mount(&mut self, key: &str, component: Component) -> tether_runtime::Result<&str> {
        let attempt = self.render(key, &component)?;
        self.commit(attempt);
        Ok(self.output(key).unwrap_or_default())
    }

    /// Unmount the instance under `key`. Returns whether one was mounted.
    pub fn unmount(&mut self, key: &str) -> bool {
        match self.mounted.remove(key) {
            Some(mounted) => {
                mounted.instance.unmount();
                debug!(key, "unmounted");
                true
            }
            None => false,
        }
    }

    /// Update requests received since the last flush.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Keys of the update requests received since the last flush, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    /// Re-render every mounted component that requested an update. Each
    /// component renders at most once per flush. Returns the number of
    /// re-renders.
    pub fn flush(&mut self) -> tether_runtime::Result<usize> {
        let mut keys = std::mem::take(&mut *self.requests.borrow_mut());
        keys.sort();
        keys.dedup();

        let mut rendered = 0;
        for key in keys {
            let Some(mounted) = self.mounted.get_mut(&key) else {
                continue;
            };
            let render = Rc::clone(&mounted.component.render);
            mounted.output = mounted.instance.observed_render(move || render())?;
            rendered += 1;
        }
        debug!(rendered, "flushed update requests");
        Ok(rendered)
    }

    /// Advance the lab clock and let the registry run due cleanup.
    pub fn advance(&self, delta: Duration) {
        self.lab.advance(delta);
        self.registry.poll();
    }

    pub fn force_cleanup(&self) {
        self.registry.force_cleanup_now();
    }

    pub fn reset_cleanup(&self) {
        self.registry.reset_cleanup_schedule();
    }

    /// Tracking records still waiting for a commit or for cleanup.
    #[must_use]
    pub fn pending_records(&self) -> usize {
        self.registry.pending_count()
    }

    #[must_use]
    pub fn output(&self, key: &str) -> Option<&str> {
        self.mounted.get(key).map(|m| m.output.as_str())
    }

    #[must_use]
    pub fn render_count(&self, key: &str) -> u64 {
        self.mounted
            .get(key)
            .map_or(0, |m| m.instance.render_count())
    }

    #[must_use]
    pub fn state(&self, key: &str) -> Option<ObserverState> {
        self.mounted.get(key).map(|m| m.instance.state())
    }

    #[must_use]
    pub fn record(&self, key: &str) -> Option<Rc<TrackingRecord>> {
        self.mounted.get(key).and_then(|m| m.instance.record())
    }

    #[must_use]
    pub fn mounted_keys(&self) -> Vec<String> {
        self.mounted.keys().cloned().collect()
    }

    /// Attempts thrown away by strict mode so far.
    #[must_use]
    pub fn discarded_attempts(&self) -> usize {
        self.discarded_attempts
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        let keys: Vec<String> = self.mounted.keys().cloned().collect();
        for key in keys {
            self.unmount(&key);
        }
    }
}

impl std::fmt::Debug for TestHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHost")
            .field("strategy", &self.registry.kind())
            .field("strict_mode", &self.strict_mode)
            .field("mounted", &self.mounted_keys())
            .field("requests", &self.request_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::Observable;

    #[test]
    fn mount_renders_and_commits() {
        let x = Observable::new(3);
        let source = x.clone();
        let mut host = TestHost::with_finalization();
        let out = host
            .mount("a", Component::new("A", move || source.get().to_string()))
            .map(str::to_owned);
        assert_eq!(out.ok().as_deref(), Some("3"));
        assert_eq!(host.state("a"), Some(ObserverState::Mounted));
        assert_eq!(host.pending_records(), 0);
    }

    #[test]
    fn strict_mode_discards_first_attempt() {
        let x = Observable::new(0);
        let source = x.clone();
        let mut host = TestHost::with_finalization().strict(true);
        assert!(host.mount("a", Component::new("A", move || source.get().to_string())).is_ok());
        assert_eq!(host.discarded_attempts(), 1);

        host.force_cleanup();
        assert_eq!(x.observer_count(), 1);
        assert_eq!(host.pending_records(), 0);
    }

    #[test]
    fn flush_renders_each_component_once() {
        let x = Observable::new(0);
        let source = x.clone();
        let mut host = TestHost::with_finalization();
        assert!(host.mount("a", Component::new("A", move || source.get().to_string())).is_ok());

        x.set(1);
        x.set(2);
        assert_eq!(host.request_count(), 1);
        assert_eq!(host.flush().ok(), Some(1));
        assert_eq!(host.output("a"), Some("2"));
        assert_eq!(host.request_count(), 0);
    }

    #[test]
    fn unmount_removes_component() {
        let x = Observable::new(0);
        let source = x.clone();
        let mut host = TestHost::with_finalization();
        assert!(host.mount("a", Component::new("A", move || source.get().to_string())).is_ok());
        assert!(host.unmount("a"));
        assert!(!host.unmount("a"));
        assert!(!x.is_observed());
    }
}
