//! Native page artifacts: the binary split tree the document engine stores,
//! and the metadata mutations that produce it.

use crate::types::{LinkTuple, SectionId, ViewRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Orientation of a native split.
///
/// `Horizontal` places children side by side (declarative `ColSplit`),
/// `Vertical` stacks them (declarative `RowSplit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitAxis {
    Horizontal,
    Vertical,
}

/// Binary split tree over leaf identifiers.
///
/// Generic over the leaf id so the forward transform can build it over
/// placeholders before real section ids exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NativeNode<Id = SectionId> {
    Leaf {
        section: Id,
    },
    Split {
        axis: SplitAxis,
        /// Share of the first child, in `(0, 1)`.
        ratio: f64,
        first: Box<NativeNode<Id>>,
        second: Box<NativeNode<Id>>,
    },
}

impl<Id> NativeNode<Id> {
    pub fn leaf(section: Id) -> Self {
        NativeNode::Leaf { section }
    }

    pub fn split(axis: SplitAxis, ratio: f64, first: Self, second: Self) -> Self {
        NativeNode::Split {
            axis,
            ratio,
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    /// Leaf ids in left-to-right order.
    pub fn leaves(&self) -> Vec<&Id> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Id>) {
        match self {
            NativeNode::Leaf { section } => out.push(section),
            NativeNode::Split { first, second, .. } => {
                first.collect_leaves(out);
                second.collect_leaves(out);
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            NativeNode::Leaf { .. } => 1,
            NativeNode::Split { first, second, .. } => 1 + first.depth().max(second.depth()),
        }
    }

    /// Rebuild the tree with every leaf id mapped through `f`.
    pub fn try_map<U, E>(&self, f: &mut impl FnMut(&Id) -> Result<U, E>) -> Result<NativeNode<U>, E> {
        Ok(match self {
            NativeNode::Leaf { section } => NativeNode::Leaf {
                section: f(section)?,
            },
            NativeNode::Split {
                axis,
                ratio,
                first,
                second,
            } => NativeNode::Split {
                axis: *axis,
                ratio: *ratio,
                first: Box::new(first.try_map(f)?),
                second: Box::new(second.try_map(f)?),
            },
        })
    }
}

// ── Mutations ──

/// One metadata mutation, applied as part of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Mutation {
    SetLayout {
        view: ViewRef,
        layout: NativeNode,
    },
    SetLink {
        section: SectionId,
        link: LinkTuple,
    },
    SetSectionInfo {
        section: SectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    SetLayout,
    SetLink,
    SetSectionInfo,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::SetLayout { .. } => MutationKind::SetLayout,
            Mutation::SetLink { .. } => MutationKind::SetLink,
            Mutation::SetSectionInfo { .. } => MutationKind::SetSectionInfo,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::SetLayout => "set_layout",
            MutationKind::SetLink => "set_link",
            MutationKind::SetSectionInfo => "set_section_info",
        })
    }
}
