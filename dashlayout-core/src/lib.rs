//! dashlayout-core: declarative dashboard layout compiler
//!
//! Turns a tree of split panels and widgets, with semantic links between
//! widgets, into the native artifacts a spreadsheet-style document engine
//! stores: a binary split tree of sections plus a bundle of metadata
//! mutations. The reverse transform reads a page back into the declarative
//! form.
//!
//! # Architecture
//!
//! ```text
//! LayoutRequest ──► forward::plan ──► LayoutCompiler::compile ──► CompileOutcome
//!   (authoring)      │                  │
//!                    ├── validate       ├── DocumentClient (create, apply)
//!                    ├── WidgetRegistry └── LinkResolver (columns, lineage)
//!                    └── N-ary → binary chains
//!
//! NativeNode + WidgetInfo ──► reverse::decompile ──► Decompiled
//! ```

pub mod authoring;
pub mod client;
pub mod compiler;
pub mod config;
pub mod errors;
pub mod executor;
pub mod memory;
pub mod native;
pub mod types;

// Re-export commonly used types
pub use authoring::dto::{LayoutNode, LayoutRequest, Link, LinkKind, LinkTarget};
pub use authoring::yaml::{parse_layout, parse_layout_json, parse_layout_yaml};
pub use client::{CreatedWidget, DocumentClient, MutationRejected};
pub use compiler::reverse::{decompile, Decompiled, DecompileOptions, SchemaSnapshot};
pub use config::CompilerConfig;
pub use errors::{CompileError, FailedStep};
pub use executor::{CompileOutcome, LayoutCompiler};
pub use memory::MemoryDocument;
pub use native::{Mutation, MutationKind, NativeNode, SplitAxis};
pub use types::{
    ColumnInfo, ColumnRef, LinkTuple, SectionId, TableMap, TableRef, ViewRef, WidgetInfo,
    WidgetType,
};
