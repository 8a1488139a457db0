//! Port resolution and link planning
//!
//! Ports are bucketed by the stringified `node.id` carried in their
//! announcement properties, then matched purely by direction and channel
//! label: every input port of the virtual device is linked to each sink
//! output port with the identical label, and independently to each source
//! output port. A virtual channel therefore receives both streams mixed.
//! Labels must match exactly; a channel with no counterpart is left
//! unlinked, and a port missing direction or channel is unmatchable but
//! never an error.

use std::cell::Cell;
use std::rc::Rc;

use pipewire::{
    properties::properties,
    proxy::{ProxyListener, ProxyT},
};
use tracing::{debug, trace};

use crate::registry::{GlobalKind, RegistryMirror};
use crate::session::{Session, SessionError};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Failed to create link: {0}")]
    LinkFailed(String),

    #[error("Server never announced the virtual device's ports: {0}")]
    PortsNeverAnnounced(#[from] SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    /// Parse the `port.direction` property; anything but `in`/`out` is
    /// treated as absent.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in" => Some(Self::Input),
            "out" => Some(Self::Output),
            _ => None,
        }
    }
}

/// One port's matching-relevant properties. Direction and channel stay
/// optional: a port that lacks either is listed but never matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortProfile {
    pub id: u32,
    pub direction: Option<PortDirection>,
    pub channel: Option<String>,
}

impl PortProfile {
    pub fn new(id: u32, direction: Option<PortDirection>, channel: Option<&str>) -> Self {
        Self {
            id,
            direction,
            channel: channel.map(String::from),
        }
    }
}

/// Ports of the three nodes of interest, in announcement order.
#[derive(Debug, Default)]
pub struct PortBuckets {
    pub source: Vec<PortProfile>,
    pub sink: Vec<PortProfile>,
    pub virtual_device: Vec<PortProfile>,
}

/// One requested connection: audio flows from `output_port` into
/// `input_port` (always a virtual-device port).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRequest {
    pub input_port: u32,
    pub output_port: u32,
}

/// True once at least one Port global belongs to `node_id`.
pub fn has_ports(mirror: &RegistryMirror, node_id: u32) -> bool {
    let id = node_id.to_string();
    let found = mirror
        .find(GlobalKind::Port, |props| {
            props.get(*pipewire::keys::NODE_ID) == Some(id.as_str())
        })
        .next()
        .is_some();
    found
}

/// Pump until the virtual device's ports have been announced, bounded by
/// `max_pumps`. Its node announcement precedes the port announcements, so a
/// fresh device usually needs one extra pump here.
pub fn wait_for_ports(
    session: &Session,
    virtual_device_id: u32,
    max_pumps: u32,
) -> Result<(), WireError> {
    let pumps = session.wait_for(|mirror| has_ports(mirror, virtual_device_id), max_pumps)?;
    debug!(virtual_device_id, pumps, "virtual device ports announced");
    Ok(())
}

/// Bucket every Port global by its owning node.
///
/// Ownership is decided by string equality between the port's `node.id`
/// property and the stringified node ids; ports belonging to none of the
/// three are ignored.
pub fn collect_ports(
    mirror: &RegistryMirror,
    source_id: u32,
    sink_id: u32,
    virtual_device_id: u32,
) -> PortBuckets {
    let source_key = source_id.to_string();
    let sink_key = sink_id.to_string();
    let virtual_key = virtual_device_id.to_string();

    let mut buckets = PortBuckets::default();
    for global in mirror.of_kind(GlobalKind::Port) {
        let Some(owner) = global.props.get(*pipewire::keys::NODE_ID) else {
            continue;
        };
        let bucket = if owner == virtual_key {
            &mut buckets.virtual_device
        } else if owner == source_key {
            &mut buckets.source
        } else if owner == sink_key {
            &mut buckets.sink
        } else {
            continue;
        };

        let direction = global
            .props
            .get(*pipewire::keys::PORT_DIRECTION)
            .and_then(PortDirection::parse);
        let channel = global.props.get(*pipewire::keys::AUDIO_CHANNEL);
        if direction.is_none() || channel.is_none() {
            trace!(id = global.id, "port missing direction or channel, unmatchable");
        }
        bucket.push(PortProfile::new(global.id, direction, channel));
    }
    buckets
}

/// Compute the link set: for each virtual-device input port, one request per
/// sink output port with the same channel label, then one per source output
/// port. Request order follows virtual-port announcement order, sink matches
/// before source matches.
pub fn plan_links(buckets: &PortBuckets) -> Vec<LinkRequest> {
    let mut requests = Vec::new();

    for virtual_port in &buckets.virtual_device {
        if virtual_port.direction != Some(PortDirection::Input) {
            continue;
        }
        let Some(channel) = virtual_port.channel.as_deref() else {
            continue;
        };

        for counterpart in buckets.sink.iter().chain(buckets.source.iter()) {
            if counterpart.direction == Some(PortDirection::Output)
                && counterpart.channel.as_deref() == Some(channel)
            {
                requests.push(LinkRequest {
                    input_port: virtual_port.id,
                    output_port: counterpart.id,
                });
            }
        }
    }

    requests
}

/// A link creation request in flight. The proxy must outlive the recording
/// run; the bound global id is recorded for diagnostics only, server-side
/// success is never awaited.
pub struct CreatedLink {
    bound_id: Rc<Cell<Option<u32>>>,
    _proxy: pipewire::link::Link,
    _listener: ProxyListener,
}

impl CreatedLink {
    /// Global id once the server has bound the request; `None` until then.
    pub fn id(&self) -> Option<u32> {
        self.bound_id.get()
    }
}

/// Issue one `link-factory` creation request per planned link.
pub fn create_links(
    session: &Session,
    requests: &[LinkRequest],
) -> Result<Vec<CreatedLink>, WireError> {
    let mut links = Vec::with_capacity(requests.len());

    for request in requests {
        let props = properties! {
            *pipewire::keys::LINK_INPUT_PORT => request.input_port.to_string(),
            *pipewire::keys::LINK_OUTPUT_PORT => request.output_port.to_string(),
        };

        let proxy: pipewire::link::Link = session
            .core()
            .create_object("link-factory", &props)
            .map_err(|e| WireError::LinkFailed(e.to_string()))?;

        let bound_id = Rc::new(Cell::new(None));
        let listener = {
            let bound_id = Rc::clone(&bound_id);
            proxy
                .upcast_ref()
                .add_listener_local()
                .bound(move |id| bound_id.set(Some(id)))
                .register()
        };

        trace!(
            input_port = request.input_port,
            output_port = request.output_port,
            "link requested"
        );

        links.push(CreatedLink {
            bound_id,
            _proxy: proxy,
            _listener: listener,
        });
    }

    Ok(links)
}

/// Diagnostic port id listing, announcement-ordered.
pub fn port_ids(ports: &[PortProfile]) -> Vec<u32> {
    ports.iter().map(|p| p.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::Props;
    use crate::registry::Global;

    fn port(id: u32, node_id: u32, direction: &str, channel: &str) -> Global {
        let mut props = Props::new();
        props.insert(*pipewire::keys::NODE_ID, node_id.to_string());
        if !direction.is_empty() {
            props.insert(*pipewire::keys::PORT_DIRECTION, direction);
        }
        if !channel.is_empty() {
            props.insert(*pipewire::keys::AUDIO_CHANNEL, channel);
        }
        Global {
            id,
            kind: GlobalKind::Port,
            version: 3,
            props,
        }
    }

    fn profile(id: u32, direction: PortDirection, channel: &str) -> PortProfile {
        PortProfile::new(id, Some(direction), Some(channel))
    }

    #[test]
    fn test_collect_ports_buckets_by_node_id() {
        let mut mirror = RegistryMirror::new();
        mirror.push(port(100, 30, "out", "FL"));
        mirror.push(port(101, 31, "out", "FL"));
        mirror.push(port(102, 50, "in", "FL"));
        mirror.push(port(103, 99, "out", "FL")); // unrelated node

        let buckets = collect_ports(&mirror, 31, 30, 50);
        assert_eq!(port_ids(&buckets.sink), vec![100]);
        assert_eq!(port_ids(&buckets.source), vec![101]);
        assert_eq!(port_ids(&buckets.virtual_device), vec![102]);
    }

    #[test]
    fn test_collect_ports_keeps_incomplete_ports_listed() {
        let mut mirror = RegistryMirror::new();
        mirror.push(port(100, 30, "", "FL"));
        mirror.push(port(101, 30, "out", ""));

        let buckets = collect_ports(&mirror, 1, 30, 2);
        assert_eq!(port_ids(&buckets.sink), vec![100, 101]);
        assert_eq!(buckets.sink[0].direction, None);
        assert_eq!(buckets.sink[1].channel, None);
    }

    #[test]
    fn test_plan_links_matching_channel_from_both_sides() {
        let buckets = PortBuckets {
            sink: vec![profile(10, PortDirection::Output, "FL")],
            source: vec![profile(20, PortDirection::Output, "FL")],
            virtual_device: vec![profile(30, PortDirection::Input, "FL")],
        };

        let requests = plan_links(&buckets);
        assert_eq!(
            requests,
            vec![
                LinkRequest { input_port: 30, output_port: 10 },
                LinkRequest { input_port: 30, output_port: 20 },
            ]
        );
    }

    #[test]
    fn test_plan_links_unmatched_channel_yields_nothing() {
        let buckets = PortBuckets {
            sink: vec![profile(10, PortDirection::Output, "FL")],
            source: vec![profile(20, PortDirection::Output, "FR")],
            virtual_device: vec![profile(30, PortDirection::Input, "FC")],
        };
        assert!(plan_links(&buckets).is_empty());
    }

    #[test]
    fn test_plan_links_ignores_non_output_counterparts() {
        let buckets = PortBuckets {
            sink: vec![profile(10, PortDirection::Input, "FL")],
            source: vec![PortProfile::new(20, None, Some("FL"))],
            virtual_device: vec![profile(30, PortDirection::Input, "FL")],
        };
        assert!(plan_links(&buckets).is_empty());
    }

    #[test]
    fn test_plan_links_ignores_virtual_output_ports() {
        let buckets = PortBuckets {
            sink: vec![profile(10, PortDirection::Output, "FL")],
            source: vec![],
            // Monitor ports of the virtual device are outputs
            virtual_device: vec![profile(30, PortDirection::Output, "FL")],
        };
        assert!(plan_links(&buckets).is_empty());
    }

    #[test]
    fn test_plan_links_skips_incomplete_virtual_port() {
        let buckets = PortBuckets {
            sink: vec![profile(10, PortDirection::Output, "FL")],
            source: vec![],
            virtual_device: vec![PortProfile::new(30, Some(PortDirection::Input), None)],
        };
        assert!(plan_links(&buckets).is_empty());
    }

    #[test]
    fn test_plan_links_end_to_end_stereo() {
        // Mirror: sink ports FL/FR out, source ports FL/FR out, virtual FL/FR in
        let mut mirror = RegistryMirror::new();
        mirror.push(port(100, 30, "out", "FL"));
        mirror.push(port(101, 30, "out", "FR"));
        mirror.push(port(110, 31, "out", "FL"));
        mirror.push(port(111, 31, "out", "FR"));
        mirror.push(port(120, 50, "in", "FL"));
        mirror.push(port(121, 50, "in", "FR"));

        let buckets = collect_ports(&mirror, 31, 30, 50);
        let requests = plan_links(&buckets);

        assert_eq!(requests.len(), 4);
        assert_eq!(
            requests,
            vec![
                LinkRequest { input_port: 120, output_port: 100 },
                LinkRequest { input_port: 120, output_port: 110 },
                LinkRequest { input_port: 121, output_port: 101 },
                LinkRequest { input_port: 121, output_port: 111 },
            ]
        );
    }

    #[test]
    fn test_has_ports() {
        let mut mirror = RegistryMirror::new();
        assert!(!has_ports(&mirror, 50));
        mirror.push(port(120, 50, "in", "FL"));
        assert!(has_ports(&mirror, 50));
        assert!(!has_ports(&mirror, 51));
    }

    #[test]
    fn test_port_direction_parse() {
        assert_eq!(PortDirection::parse("in"), Some(PortDirection::Input));
        assert_eq!(PortDirection::parse("out"), Some(PortDirection::Output));
        assert_eq!(PortDirection::parse("sideways"), None);
    }
}
