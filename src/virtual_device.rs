//! Virtual device provisioning
//!
//! One `create_object` on the `adapter` factory, parameterized for a
//! two-channel null-audio-sink announced as a virtual audio source. The
//! server assigns the global id asynchronously; the proxy's `bound` event
//! delivers it, and the registry mirror growing past its pre-creation
//! baseline confirms the node (and whatever the server creates alongside it)
//! has been announced. Both waits share one bounded pump budget instead of
//! spinning forever on a dropped request.

use std::cell::Cell;
use std::rc::Rc;

use pipewire::{
    properties::properties,
    proxy::{ProxyListener, ProxyT},
};
use tracing::debug;

use crate::session::{Session, SessionError};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Failed to create virtual device: {0}")]
    CreateFailed(String),

    #[error("Server never announced the virtual device: {0}")]
    NeverAnnounced(#[from] SessionError),
}

/// Logical description of the virtual device.
#[derive(Debug, Clone)]
pub struct VirtualDeviceSpec {
    pub name: String,
    pub factory: String,
    pub media_class: String,
    pub channels: String,
}

impl Default for VirtualDeviceSpec {
    fn default() -> Self {
        Self {
            name: "All Audio (pw-allaudio)".into(),
            factory: "support.null-audio-sink".into(),
            media_class: "Audio/Source/Virtual".into(),
            channels: "FL, FR".into(),
        }
    }
}

/// Live handle to the created node. The proxy must stay alive for as long as
/// the device should exist; dropping it destroys the node server-side.
pub struct VirtualDevice {
    id: u32,
    _proxy: pipewire::node::Node,
    _listener: ProxyListener,
}

impl VirtualDevice {
    /// Global id of the created node.
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Issue the creation request and pump until the server has both bound the
/// proxy to a global id and announced the new object(s) in the registry.
pub fn provision(
    session: &Session,
    spec: &VirtualDeviceSpec,
    max_pumps: u32,
) -> Result<VirtualDevice, ProvisionError> {
    let props = properties! {
        *pipewire::keys::NODE_NAME => spec.name.as_str(),
        *pipewire::keys::FACTORY_NAME => spec.factory.as_str(),
        *pipewire::keys::MEDIA_CLASS => spec.media_class.as_str(),
        *pipewire::keys::AUDIO_CHANNELS => spec.channels.as_str(),
    };

    let baseline = session.mirror_len();

    let proxy: pipewire::node::Node = session
        .core()
        .create_object("adapter", &props)
        .map_err(|e| ProvisionError::CreateFailed(e.to_string()))?;

    let bound_id = Rc::new(Cell::new(None));
    let listener = {
        let bound_id = Rc::clone(&bound_id);
        proxy
            .upcast_ref()
            .add_listener_local()
            .bound(move |id| bound_id.set(Some(id)))
            .register()
    };

    let pumps = session.wait_for(
        |mirror| mirror.len() > baseline && bound_id.get().is_some(),
        max_pumps,
    )?;

    // The ready condition guarantees the id is set once the wait returns.
    let id = bound_id
        .get()
        .ok_or_else(|| ProvisionError::CreateFailed("bound event carried no id".into()))?;

    debug!(id, pumps, name = spec.name.as_str(), "virtual device announced");

    Ok(VirtualDevice {
        id,
        _proxy: proxy,
        _listener: listener,
    })
}
