//! Default-device resolution
//!
//! The session metadata carries the defaults as JSON-ish fragments, e.g.
//! `default.audio.sink = {"name":"alsa_output.pci-0000_00_1f.3.analog-stereo"}`.
//! [`embedded_name`] pulls the name out with the same offsets the server's
//! own clients use: first colon plus two, up to the last quote. The resolved
//! names are then matched against the `node.name` of every Node global.

use tracing::warn;

use crate::props::Props;
use crate::registry::{GlobalKind, RegistryMirror};

pub const DEFAULT_SOURCE_KEY: &str = "default.audio.source";
pub const DEFAULT_SINK_KEY: &str = "default.audio.sink";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No node named {name:?} for the default {role}")]
    NodeNotFound { role: &'static str, name: String },
}

/// Textual names of the default devices. Either may be empty when the
/// corresponding metadata key is absent; matching then simply finds nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultNames {
    pub source: String,
    pub sink: String,
}

impl DefaultNames {
    /// Read both defaults out of the merged metadata properties.
    pub fn from_metadata(metadata: &Props) -> Self {
        let extract = |key: &str| {
            metadata
                .get(key)
                .and_then(embedded_name)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            source: extract(DEFAULT_SOURCE_KEY),
            sink: extract(DEFAULT_SINK_KEY),
        }
    }
}

/// Live node ids for the two resolved defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedNodes {
    pub source: u32,
    pub sink: u32,
}

/// Extract the device name embedded in a metadata value of the shape
/// `{"name":"<name>"}`: the substring from first-colon-plus-two to the last
/// quote. Malformed values (no colon, no quote, boundaries out of order or
/// off a UTF-8 boundary) yield `None`.
pub fn embedded_name(value: &str) -> Option<&str> {
    let colon = value.find(':')?;
    let quote = value.rfind('"')?;
    value.get(colon + 2..quote)
}

/// Match the resolved names against every Node global's `node.name`.
///
/// All nodes are scanned and a later match overwrites an earlier one, so the
/// last matching node in announcement order wins. Duplicate names are unusual
/// enough to warrant a warning when that overwrite happens.
pub fn resolve_nodes(
    mirror: &RegistryMirror,
    names: &DefaultNames,
) -> Result<ResolvedNodes, ResolveError> {
    let mut source = None;
    let mut sink = None;

    for global in mirror.of_kind(GlobalKind::Node) {
        let Some(name) = global.props.get(*pipewire::keys::NODE_NAME) else {
            continue;
        };
        if name == names.source {
            if let Some(previous) = source {
                warn!(name, previous, id = global.id, "duplicate source node name");
            }
            source = Some(global.id);
        }
        if name == names.sink {
            if let Some(previous) = sink {
                warn!(name, previous, id = global.id, "duplicate sink node name");
            }
            sink = Some(global.id);
        }
    }

    let source = source.ok_or_else(|| ResolveError::NodeNotFound {
        role: "source",
        name: names.source.clone(),
    })?;
    let sink = sink.ok_or_else(|| ResolveError::NodeNotFound {
        role: "sink",
        name: names.sink.clone(),
    })?;

    Ok(ResolvedNodes { source, sink })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Global;

    fn node(id: u32, name: &str) -> Global {
        Global {
            id,
            kind: GlobalKind::Node,
            version: 3,
            props: [(*pipewire::keys::NODE_NAME, name)].into_iter().collect(),
        }
    }

    #[test]
    fn test_embedded_name_canonical_shape() {
        assert_eq!(
            embedded_name(r#"{"name":"alsa_input.foo"}"#),
            Some("alsa_input.foo")
        );
        assert_eq!(
            embedded_name(r#"{"name":"alsa_output.pci-0000_00_1f.3.analog-stereo"}"#),
            Some("alsa_output.pci-0000_00_1f.3.analog-stereo")
        );
    }

    #[test]
    fn test_embedded_name_uses_first_colon_and_last_quote() {
        // Extra colons inside the name must not move the start boundary
        assert_eq!(embedded_name(r#"{"name":"a:b:c"}"#), Some("a:b:c"));
    }

    #[test]
    fn test_embedded_name_malformed() {
        assert_eq!(embedded_name("no quotes here: at all"), None);
        assert_eq!(embedded_name(r#""no colon""#), None);
        // Last quote before first-colon-plus-two
        assert_eq!(embedded_name(r#""x":"#), None);
        assert_eq!(embedded_name(""), None);
    }

    #[test]
    fn test_defaults_from_metadata() {
        let metadata: Props = [
            (DEFAULT_SOURCE_KEY, r#"{"name":"alsa_input.bar"}"#),
            (DEFAULT_SINK_KEY, r#"{"name":"alsa_output.foo"}"#),
        ]
        .into_iter()
        .collect();

        let names = DefaultNames::from_metadata(&metadata);
        assert_eq!(names.source, "alsa_input.bar");
        assert_eq!(names.sink, "alsa_output.foo");
    }

    #[test]
    fn test_defaults_absent_keys_stay_empty() {
        let names = DefaultNames::from_metadata(&Props::new());
        assert_eq!(names.source, "");
        assert_eq!(names.sink, "");
    }

    #[test]
    fn test_resolve_nodes_matches_by_name() {
        let mut mirror = RegistryMirror::new();
        mirror.push(node(30, "alsa_output.foo"));
        mirror.push(node(31, "alsa_input.bar"));
        mirror.push(node(32, "unrelated"));

        let names = DefaultNames {
            source: "alsa_input.bar".into(),
            sink: "alsa_output.foo".into(),
        };
        let resolved = resolve_nodes(&mirror, &names).unwrap();
        assert_eq!(resolved.source, 31);
        assert_eq!(resolved.sink, 30);
    }

    #[test]
    fn test_resolve_nodes_last_match_wins() {
        let mut mirror = RegistryMirror::new();
        mirror.push(node(10, "dup"));
        mirror.push(node(11, "dup"));
        mirror.push(node(12, "snk"));

        let names = DefaultNames {
            source: "dup".into(),
            sink: "snk".into(),
        };
        let resolved = resolve_nodes(&mirror, &names).unwrap();
        assert_eq!(resolved.source, 11);
    }

    #[test]
    fn test_resolve_nodes_empty_names_find_nothing() {
        let mut mirror = RegistryMirror::new();
        mirror.push(node(1, "alsa_output.foo"));

        let err = resolve_nodes(&mirror, &DefaultNames::default()).unwrap_err();
        assert!(matches!(err, ResolveError::NodeNotFound { role: "source", .. }));
    }

    #[test]
    fn test_resolve_nodes_missing_sink() {
        let mut mirror = RegistryMirror::new();
        mirror.push(node(1, "src"));

        let names = DefaultNames {
            source: "src".into(),
            sink: "snk".into(),
        };
        let err = resolve_nodes(&mirror, &names).unwrap_err();
        assert!(matches!(err, ResolveError::NodeNotFound { role: "sink", .. }));
    }
}
