//! Per-compilation widget registry.
//!
//! Every pane gets a `PaneRef` in left-to-right DFS order: real section ids
//! for `Leaf`/`ExistingPane`, placeholders for `NewPane`. Placeholders are
//! resolved one at a time as creation calls return. Links whose owner or
//! target is still a placeholder wait in the deferred queue.

use crate::authoring::dto::{LayoutNode, Link, LinkTarget};
use crate::authoring::names::{NameIndex, NameMatch};
use crate::types::SectionId;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Compilation-local stand-in for a widget that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaceholderId(u32);

impl PlaceholderId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaneRef {
    Real(SectionId),
    Placeholder(PlaceholderId),
}

impl fmt::Display for PaneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaneRef::Real(id) => write!(f, "{}", id),
            PaneRef::Placeholder(p) => write!(f, "{}", p),
        }
    }
}

/// A link waiting for its owner or target to get a real id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLink {
    /// Owning pane, in traversal order.
    pub owner_index: usize,
    pub owner: PaneRef,
    pub target: LinkTarget,
    pub link: Link,
}

#[derive(Debug, Default)]
pub struct WidgetRegistry {
    panes: Vec<PaneRef>,
    resolved: HashMap<PlaceholderId, SectionId>,
    names: NameIndex,
    known_sections: HashSet<SectionId>,
    pending: Vec<PendingLink>,
    next_placeholder: u32,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Phase 1: allocation ──

    /// Register the next pane in traversal order.
    pub fn register(&mut self, pane: &LayoutNode) -> PaneRef {
        let index = self.panes.len();
        self.names.add(index, pane);
        let pane_ref = match pane.section_id() {
            Some(section) => {
                self.known_sections.insert(section);
                PaneRef::Real(section)
            }
            None => {
                self.next_placeholder += 1;
                PaneRef::Placeholder(PlaceholderId(self.next_placeholder))
            }
        };
        self.panes.push(pane_ref);
        pane_ref
    }

    /// Record that `section` exists in the document outside this tree.
    pub fn mark_known(&mut self, section: SectionId) {
        self.known_sections.insert(section);
    }

    pub fn resolve(&mut self, placeholder: PlaceholderId, section: SectionId) {
        self.resolved.insert(placeholder, section);
        self.known_sections.insert(section);
    }

    // ── Lookups ──

    pub fn lookup(&self, pane: PaneRef) -> Option<SectionId> {
        match pane {
            PaneRef::Real(id) => Some(id),
            PaneRef::Placeholder(p) => self.resolved.get(&p).copied(),
        }
    }

    pub fn pane_count(&self) -> usize {
        self.panes.len()
    }

    /// Traversal index of the in-tree pane a link target denotes.
    pub fn target_pane_index(&self, target: &LinkTarget) -> Option<usize> {
        match target {
            LinkTarget::Pane(key) => match self.names.resolve(key) {
                NameMatch::Unique(index) => Some(index),
                NameMatch::Ambiguous(_) | NameMatch::Missing => None,
            },
            LinkTarget::Section(id) => self
                .panes
                .iter()
                .position(|p| self.lookup(*p) == Some(*id)),
        }
    }

    /// Real section id of a link target, once it has one.
    pub fn lookup_target(&self, target: &LinkTarget) -> Option<SectionId> {
        match target {
            LinkTarget::Pane(_) => self
                .target_pane_index(target)
                .and_then(|i| self.lookup(self.panes[i])),
            LinkTarget::Section(id) => self.known_sections.contains(id).then_some(*id),
        }
    }

    pub fn is_resolvable(&self, link: &PendingLink) -> bool {
        self.lookup(link.owner).is_some() && self.lookup_target(&link.target).is_some()
    }

    // ── Phase 2: deferred links ──

    pub fn defer_link(&mut self, link: PendingLink) {
        self.pending.push(link);
    }

    /// Remove and return every deferred link that can now be resolved,
    /// keeping the rest queued in their original order.
    pub fn drain_resolvable(&mut self) -> Vec<PendingLink> {
        let queued = std::mem::take(&mut self.pending);
        let (ready, waiting): (Vec<_>, Vec<_>) =
            queued.into_iter().partition(|l| self.is_resolvable(l));
        self.pending = waiting;
        ready
    }

    pub fn pending(&self) -> &[PendingLink] {
        &self.pending
    }
}
