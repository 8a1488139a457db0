//! PipeWire connection and event-loop pumping
//!
//! Single-threaded and cooperative: server notifications only land while the
//! loop is pumped, so every query over the [`RegistryMirror`] runs between
//! pumps under a plain `RefCell`. One [`Session::pump`] is one `core.sync`
//! roundtrip: after it returns, everything the server had announced before
//! the sync is in the mirror. Requests a dispatch itself issues (such as the
//! metadata binds below) go out mid-roundtrip, so their events only land on
//! the next pump.
//!
//! The registry listener does two jobs: append every global to the mirror,
//! and bind each metadata store so its `default.audio.*` properties land in a
//! merged key/value map (the last non-empty value wins when several stores
//! announce the same key).

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Once;

use pipewire::{
    context::ContextRc,
    core::{CoreRc, PW_ID_CORE},
    main_loop::MainLoopRc,
    metadata::{Metadata, MetadataListener},
    registry::{GlobalObject, RegistryRc},
    types::ObjectType,
};
use tracing::warn;

use crate::props::Props;
use crate::registry::{Global, GlobalKind, RegistryMirror};

static PIPEWIRE_INIT: Once = Once::new();

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to connect to PipeWire: {0}")]
    Connect(String),

    #[error("Event loop sync failed: {0}")]
    Sync(String),

    #[error("Timed out waiting for the server after {pumps} event-loop pumps")]
    Timeout { pumps: u32 },
}

/// Pump until `ready` holds, bounded by `max_pumps`.
///
/// Checks `ready` before the first pump so an already-satisfied condition
/// costs no roundtrip. Returns the number of pumps performed.
pub fn pump_until<P, C>(mut pump: P, mut ready: C, max_pumps: u32) -> Result<u32, SessionError>
where
    P: FnMut() -> Result<(), SessionError>,
    C: FnMut() -> bool,
{
    let mut pumps = 0;
    while !ready() {
        if pumps == max_pumps {
            return Err(SessionError::Timeout { pumps });
        }
        pump()?;
        pumps += 1;
    }
    Ok(pumps)
}

/// Owns the connection, the registry subscription, and the mirror it feeds.
///
/// Dropping the session closes the connection, which also destroys any
/// server-side objects created through it that do not linger.
pub struct Session {
    mirror: Rc<RefCell<RegistryMirror>>,
    metadata: Rc<RefCell<Props>>,
    // Bound metadata proxies and their listeners; kept alive so property
    // events keep flowing on later pumps.
    _metadata_stores: Rc<RefCell<Vec<(Metadata, MetadataListener)>>>,
    _registry_listener: pipewire::registry::Listener,
    _registry: RegistryRc,
    core: CoreRc,
    _context: ContextRc,
    mainloop: MainLoopRc,
}

impl Session {
    /// Connect to the server and subscribe to the registry. The mirror is
    /// empty until the first [`pump`](Self::pump).
    pub fn connect() -> Result<Self, SessionError> {
        PIPEWIRE_INIT.call_once(|| {
            pipewire::init();
        });

        let mainloop = MainLoopRc::new(None)
            .map_err(|e| SessionError::Connect(format!("main loop: {e}")))?;
        let context = ContextRc::new(&mainloop, None)
            .map_err(|e| SessionError::Connect(format!("context: {e}")))?;
        let core = context
            .connect_rc(None)
            .map_err(|e| SessionError::Connect(format!("core connect: {e}")))?;
        let registry = core
            .get_registry_rc()
            .map_err(|e| SessionError::Connect(format!("registry: {e}")))?;

        let mirror = Rc::new(RefCell::new(RegistryMirror::new()));
        let metadata = Rc::new(RefCell::new(Props::new()));
        let metadata_stores: Rc<RefCell<Vec<(Metadata, MetadataListener)>>> =
            Rc::new(RefCell::new(Vec::new()));

        let registry_listener = {
            let mirror = Rc::clone(&mirror);
            let metadata = Rc::clone(&metadata);
            let metadata_stores = Rc::clone(&metadata_stores);
            let registry_for_bind = registry.clone();
            registry
                .add_listener_local()
                .global(move |global| {
                    mirror.borrow_mut().push(record_global(global));
                    if global.type_ == ObjectType::Metadata {
                        watch_metadata(&registry_for_bind, global, &metadata, &metadata_stores);
                    }
                })
                .register()
        };

        Ok(Self {
            mirror,
            metadata,
            _metadata_stores: metadata_stores,
            _registry_listener: registry_listener,
            _registry: registry,
            core,
            _context: context,
            mainloop,
        })
    }

    /// One roundtrip: sync the core, run the loop until the matching `done`
    /// event arrives. Every notification queued before the sync is dispatched
    /// into the mirror on the way.
    pub fn pump(&self) -> Result<(), SessionError> {
        let pending = self
            .core
            .sync(0)
            .map_err(|e| SessionError::Sync(e.to_string()))?;

        let done = Rc::new(Cell::new(false));
        let _core_listener = {
            let done = Rc::clone(&done);
            let mainloop = self.mainloop.downgrade();
            self.core
                .add_listener_local()
                .done(move |id, seq| {
                    if id == PW_ID_CORE && seq == pending {
                        done.set(true);
                        if let Some(mainloop) = mainloop.upgrade() {
                            mainloop.quit();
                        }
                    }
                })
                .register()
        };

        while !done.get() {
            self.mainloop.run();
        }
        Ok(())
    }

    /// Pump until `ready(mirror)` holds, bounded by `max_pumps`.
    pub fn wait_for<C>(&self, mut ready: C, max_pumps: u32) -> Result<u32, SessionError>
    where
        C: FnMut(&RegistryMirror) -> bool,
    {
        let mirror = Rc::clone(&self.mirror);
        pump_until(|| self.pump(), || ready(&mirror.borrow()), max_pumps)
    }

    /// Borrow the mirror for querying. Must not be held across a pump.
    pub fn mirror(&self) -> std::cell::Ref<'_, RegistryMirror> {
        self.mirror.borrow()
    }

    pub fn mirror_len(&self) -> usize {
        self.mirror.borrow().len()
    }

    /// Snapshot of the merged metadata properties seen so far.
    pub fn metadata(&self) -> Props {
        self.metadata.borrow().clone()
    }

    pub(crate) fn core(&self) -> &CoreRc {
        &self.core
    }
}

fn record_global<P: AsRef<pipewire::spa::utils::dict::DictRef>>(
    global: &GlobalObject<P>,
) -> Global {
    let kind = match global.type_ {
        ObjectType::Node => GlobalKind::Node,
        ObjectType::Port => GlobalKind::Port,
        ObjectType::Metadata => GlobalKind::Metadata,
        _ => GlobalKind::Other,
    };

    let props = match &global.props {
        Some(dict) => dict.as_ref().iter().collect(),
        None => Props::new(),
    };

    Global {
        id: global.id,
        kind,
        version: global.version,
        props,
    }
}

/// Bind a metadata store and funnel its properties into the merged map.
fn watch_metadata<P: AsRef<pipewire::spa::utils::dict::DictRef>>(
    registry: &RegistryRc,
    global: &GlobalObject<P>,
    metadata: &Rc<RefCell<Props>>,
    stores: &Rc<RefCell<Vec<(Metadata, MetadataListener)>>>,
) {
    let proxy: Metadata = match registry.bind(global) {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!(id = global.id, "failed to bind metadata store: {e}");
            return;
        }
    };

    let listener = {
        let metadata = Rc::clone(metadata);
        proxy
            .add_listener_local()
            .property(move |_subject, key, _type, value| {
                if let (Some(key), Some(value)) = (key, value) {
                    // Several stores may carry the same key; the last
                    // non-empty value wins.
                    if !value.is_empty() {
                        metadata.borrow_mut().insert(key, value);
                    }
                }
                0
            })
            .register()
    };

    stores.borrow_mut().push((proxy, listener));
}
