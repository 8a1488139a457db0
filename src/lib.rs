//! pw-allaudio: route all default audio into one virtual capture device
//!
//! Discovers the current default PipeWire sink and source, provisions a
//! two-channel `support.null-audio-sink` virtual device, links it so each of
//! its input channels receives the matching output channel of both defaults,
//! then launches a recording command and relays its exit status.
//!
//! The discovery core is split so it stays testable without a server:
//!
//! - **Registry mirror** ([`registry`]): append-only snapshot of globals,
//!   populated by the registry listener, queried between event-loop pumps.
//! - **Session** ([`session`]): owns the connection and the pump; everything
//!   that touches the wire lives here or behind it.
//! - **Resolvers and planner** ([`defaults`], [`links`]): pure functions over
//!   mirror snapshots.

pub mod defaults;
pub mod launcher;
pub mod links;
pub mod props;
pub mod registry;
pub mod session;
pub mod virtual_device;

pub use defaults::{embedded_name, resolve_nodes, DefaultNames, ResolveError, ResolvedNodes};
pub use launcher::{run_command, Launch, LaunchError};
pub use links::{
    collect_ports, create_links, plan_links, port_ids, wait_for_ports, CreatedLink, LinkRequest,
    PortBuckets, PortDirection, PortProfile, WireError,
};
pub use props::Props;
pub use registry::{Global, GlobalKind, RegistryMirror};
pub use session::{pump_until, Session, SessionError};
pub use virtual_device::{provision, ProvisionError, VirtualDevice, VirtualDeviceSpec};
