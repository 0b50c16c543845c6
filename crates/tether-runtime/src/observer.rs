#![forbid(unsafe_code)]

//! The per-instance observer runtime.
//!
//! # Design
//!
//! An [`ObserverInstance`] lives as long as the host keeps one component
//! instance. Each render attempt goes through
//! [`observed_render`](ObserverInstance::observed_render), which tracks the
//! render function with the instance's [`RoundRobinReaction`]. The host
//! reports a successful commit through
//! [`committed`](ObserverInstance::committed) and teardown through
//! [`unmount`](ObserverInstance::unmount).
//!
//! Until the commit arrives the tracking record is only *pending*: the
//! registry may decide the attempt was abandoned and dispose it. Changes seen
//! before commit are remembered in the record and turned into exactly one
//! update request when the commit arrives.
//!
//! # State machine
//!
//! ```text
//! Uninitialized ──render──▶ TrackingUncommitted ──commit──▶ Mounted ──unmount──▶ Unmounted
//!       ▲                          │
//!       └───────── reclaimed ──────┘
//! ```
//!
//! # Failure Modes
//!
//! - **Render returns an error**: the attempt's tracking is disposed and the
//!   slot emptied before [`ObserverError::Render`] is returned.
//! - **Render panics**: same cleanup, then the panic continues.
//! - **Commit after unmount**: logged and ignored.

use std::cell::{Cell, OnceCell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::effects::{Disposer, InstanceEffects};
use crate::error::{BoxError, ObserverError, Result};
use crate::observer_body::ObserverBody;
use crate::registry::{ReactionTrackingRegistry, RetainedMarker, TrackingRecord, TrackingSlot};
use crate::round_robin::{RoundRobinReaction, UNKNOWN_DEBUG_VALUE};
use crate::static_rendering::is_static_rendering;

/// Reaction name used for a component called `base`.
#[must_use]
pub fn observer_name_for(base: &str) -> String {
    format!("observer({base})")
}

/// Lifecycle position of an [`ObserverInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    /// No tracking record (never rendered, or the pending one was reclaimed).
    Uninitialized,
    /// Rendered, waiting for the host to commit.
    TrackingUncommitted,
    Mounted,
    Unmounted,
}

struct RenderingGuard<'a>(&'a Cell<bool>);

impl Drop for RenderingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct ObserverInstance {
    name: String,
    request_update: Rc<dyn Fn()>,
    registry: Rc<ReactionTrackingRegistry>,
    slot: Rc<TrackingSlot>,
    marker: RetainedMarker,
    mounted: Cell<bool>,
    unmounted: Cell<bool>,
    rendering: Cell<bool>,
    render_count: Cell<u64>,
    effects: RefCell<Option<InstanceEffects>>,
}

impl ObserverInstance {
    /// Create an instance bound to this thread's registry.
    ///
    /// `request_update` asks the host to render the instance again.
    #[must_use]
    pub fn new(base_name: &str, request_update: impl Fn() + 'static) -> Self {
        Self::with_registry(base_name, request_update, ReactionTrackingRegistry::global())
    }

    #[must_use]
    pub fn with_registry(
        base_name: &str,
        request_update: impl Fn() + 'static,
        registry: Rc<ReactionTrackingRegistry>,
    ) -> Self {
        Self {
            name: observer_name_for(base_name),
            request_update: Rc::new(request_update),
            registry,
            slot: TrackingSlot::new(),
            marker: RetainedMarker::new(),
            mounted: Cell::new(false),
            unmounted: Cell::new(false),
            rendering: Cell::new(false),
            render_count: Cell::new(0),
            effects: RefCell::new(None),
        }
    }

    fn create_record(&self, mounted: bool) -> Rc<TrackingRecord> {
        let link: Rc<OnceCell<Weak<TrackingRecord>>> = Rc::new(OnceCell::new());
        let reaction = {
            let link = Rc::clone(&link);
            let request_update = Rc::clone(&self.request_update);
            let name = self.name.clone();
            RoundRobinReaction::new(self.name.clone(), move || {
                let Some(record) = link.get().and_then(Weak::upgrade) else {
                    return;
                };
                if record.is_mounted() {
                    trace!(observer = %name, "update requested");
                    request_update();
                } else {
                    trace!(observer = %name, "change before mount");
                    record.mark_changed_before_mount();
                }
            })
        };

        let record = if mounted {
            let record = Rc::new(TrackingRecord::new_mounted(self.slot.id(), reaction));
            self.slot.set(Rc::clone(&record));
            record
        } else {
            self.registry
                .add_reaction_to_track(&self.slot, reaction, &self.marker)
        };
        let _ = link.set(Rc::downgrade(&record));
        debug!(
            observer = %self.name,
            slot = self.slot.id().get(),
            mounted,
            "tracking record created"
        );
        record
    }

    fn discard(&self, record: &Rc<TrackingRecord>) {
        record.dispose();
        self.registry.forget(record, &self.marker);
        self.slot.clear_if(record);
    }

    fn render_error(&self, source: impl Into<BoxError>) -> ObserverError {
        ObserverError::Render {
            name: self.name.clone(),
            source: source.into(),
        }
    }

    /// Run one render attempt, tracking everything `f` reads.
    ///
    /// With static rendering enabled `f` simply runs. A failing `f` leaves
    /// nothing subscribed.
    pub fn observed_render<T, E>(&self, f: impl FnOnce() -> std::result::Result<T, E>) -> Result<T>
    where
        E: Into<BoxError>,
    {
        if is_static_rendering() {
            return f().map_err(|e| self.render_error(e));
        }
        if self.unmounted.get() {
            return Err(ObserverError::RenderAfterUnmount {
                name: self.name.clone(),
            });
        }
        if self.rendering.replace(true) {
            return Err(ObserverError::ReentrantRender {
                name: self.name.clone(),
            });
        }
        let _rendering = RenderingGuard(&self.rendering);

        let record = match self.slot.get() {
            Some(record) if !record.is_disposed() => record,
            _ => self.create_record(self.mounted.get()),
        };
        self.render_count.set(self.render_count.get() + 1);

        let outcome = catch_unwind(AssertUnwindSafe(|| record.reaction().track(f)));
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                self.discard(&record);
                let err = self.render_error(err);
                debug!(observer = %self.name, error = %err, "render failed; tracking disposed");
                Err(err)
            }
            Err(payload) => {
                self.discard(&record);
                debug!(observer = %self.name, "render panicked; tracking disposed");
                resume_unwind(payload)
            }
        }
    }

    /// Render an [`ObserverBody`], rejecting bodies without exactly one
    /// render function.
    pub fn observed_render_body<T, E, F>(&self, body: ObserverBody<F>) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: Into<BoxError>,
    {
        let f = body.resolve()?;
        self.observed_render(f)
    }

    /// The host committed this instance. Idempotent.
    pub fn committed(&self) {
        if self.unmounted.get() {
            warn!(observer = %self.name, "commit reported after unmount; ignored");
            return;
        }
        if self.mounted.replace(true) {
            return;
        }
        self.registry.record_reaction_as_committed(&self.slot, &self.marker);

        match self.slot.get() {
            Some(record) if !record.is_disposed() => {
                record.set_mounted();
                if record.take_changed_before_mount() {
                    debug!(observer = %self.name, "changed before mount; requesting update");
                    (self.request_update)();
                }
            }
            _ => {
                debug!(observer = %self.name, "tracking reclaimed before commit; recreating");
                self.create_record(true);
                (self.request_update)();
            }
        }
    }

    /// The host is tearing this instance down. Idempotent.
    pub fn unmount(&self) {
        if self.unmounted.replace(true) {
            return;
        }
        if let Some(record) = self.slot.take() {
            record.dispose();
            self.registry.forget(&record, &self.marker);
        }
        self.dispose_effects();
        debug!(observer = %self.name, "unmounted");
    }

    fn dispose_effects(&self) {
        let effects = self.effects.borrow_mut().take();
        if let Some(effects) = effects {
            effects.dispose();
        }
    }

    /// Register effects the first time this is called; later calls are
    /// ignored. The effects are disposed on unmount.
    pub fn use_effects(&self, init: impl FnOnce() -> Vec<Disposer>) {
        if self.unmounted.get() || self.effects.borrow().is_some() {
            return;
        }
        let effects = InstanceEffects::new(init());
        *self.effects.borrow_mut() = Some(effects);
    }

    #[must_use]
    pub fn state(&self) -> ObserverState {
        if self.unmounted.get() {
            ObserverState::Unmounted
        } else if self.mounted.get() {
            ObserverState::Mounted
        } else if self.slot.get().is_some_and(|record| !record.is_disposed()) {
            ObserverState::TrackingUncommitted
        } else {
            ObserverState::Uninitialized
        }
    }

    /// Dependency names of the live tracking slot, for diagnostics.
    #[must_use]
    pub fn debug_value(&self) -> String {
        match self.slot.get() {
            Some(record) => record.reaction().debug_value(),
            None => UNKNOWN_DEBUG_VALUE.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted.get() && !self.unmounted.get()
    }

    #[must_use]
    pub fn record(&self) -> Option<Rc<TrackingRecord>> {
        self.slot.get()
    }

    #[must_use]
    pub fn render_count(&self) -> u64 {
        self.render_count.get()
    }

    #[must_use]
    pub fn registry(&self) -> &Rc<ReactionTrackingRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn has_effects(&self) -> bool {
        self.effects.borrow().is_some()
    }
}

impl Drop for ObserverInstance {
    fn drop(&mut self) {
        if self.is_mounted() {
            self.unmount();
        } else {
            // Abandoned before commit: the pending record is left to the
            // registry, which learns about it through the marker.
            self.dispose_effects();
        }
    }
}

impl std::fmt::Debug for ObserverInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverInstance")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("slot", &self.slot.id())
            .field("render_count", &self.render_count.get())
            .finish()
    }
}
