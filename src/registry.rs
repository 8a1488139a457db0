//! Local mirror of the server's global-object announcements
//!
//! The registry listener appends one [`Global`] per announcement; queries are
//! pure filters over the accumulated collection. The mirror only ever grows:
//! removal events are not handled for this tool's one-shot lifetime, and the
//! collection's length doubles as the synchronization baseline when waiting
//! for a creation request to be reflected (see
//! [`provision`](crate::virtual_device::provision)).
//!
//! The mirror holds no pipewire types so resolvers and planners can be tested
//! against hand-built snapshots.

use crate::props::Props;

/// Type tag of a server-announced object, reduced to the kinds this tool
/// queries for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    Node,
    Port,
    Metadata,
    /// Anything else (devices, factories, modules, ...). Kept in the mirror
    /// so its growth still reflects every announcement, never queried.
    Other,
}

/// One server-announced global: opaque id, type tag, version, and an owned
/// copy of the properties carried by the announcement.
#[derive(Debug, Clone)]
pub struct Global {
    pub id: u32,
    pub kind: GlobalKind,
    pub version: u32,
    pub props: Props,
}

/// Append-only, announcement-ordered collection of globals.
#[derive(Debug, Default)]
pub struct RegistryMirror {
    globals: Vec<Global>,
}

impl RegistryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, global: Global) {
        self.globals.push(global);
    }

    /// Number of announcements observed so far. Captured as a baseline before
    /// issuing a creation request whose effect the caller needs reflected.
    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Global> {
        self.globals.iter()
    }

    /// All globals of one kind, in announcement order.
    pub fn of_kind(&self, kind: GlobalKind) -> impl Iterator<Item = &Global> {
        self.globals.iter().filter(move |g| g.kind == kind)
    }

    /// All globals of one kind whose properties satisfy the predicate.
    pub fn find<'a, P>(&'a self, kind: GlobalKind, mut pred: P) -> impl Iterator<Item = &'a Global>
    where
        P: FnMut(&Props) -> bool + 'a,
    {
        self.of_kind(kind).filter(move |g| pred(&g.props))
    }
}
