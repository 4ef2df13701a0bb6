//! Static operation catalog.
//!
//! Every known operation name maps to one [`OperationSpec`]: the scope it is
//! addressed at, the parameters it cannot run without, and how its outcome is
//! shaped for publishing. Names outside the catalog resolve to
//! [`Operation::Passthrough`] and are forwarded to the backend as-is.

use std::fmt;

use crate::types::Document;

/// How a raw execution outcome becomes a publishable payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultShape {
    /// Outcome is a cursor, drained into an ordered sequence.
    List,
    /// Outcome is a write acknowledgment, flattened to its public fields.
    WriteResult,
    /// Outcome is published unmodified.
    SingleValue,
}

/// What an operation is invoked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Database,
    Collection,
}

/// Typed invocation descriptor for a known operation.
#[derive(Debug, PartialEq, Eq)]
pub struct OperationSpec {
    pub name: &'static str,
    pub scope: Scope,
    pub shape: ResultShape,
    /// Parameter names that must be present in the request body.
    pub required: &'static [&'static str],
}

impl OperationSpec {
    /// First required parameter missing from `params`, if any.
    #[must_use]
    pub fn missing_parameter(&self, params: &Document) -> Option<&'static str> {
        self.required
            .iter()
            .copied()
            .find(|name| !params.contains_key(*name))
    }
}

const fn spec(
    name: &'static str,
    scope: Scope,
    shape: ResultShape,
    required: &'static [&'static str],
) -> OperationSpec {
    OperationSpec {
        name,
        scope,
        shape,
        required,
    }
}

use ResultShape::{List, SingleValue, WriteResult};
use Scope::{Collection, Database};

static CATALOG: &[OperationSpec] = &[
    // Cursor-returning collection operations.
    spec("find", Collection, List, &[]),
    spec("aggregate", Collection, List, &["pipeline"]),
    spec("list_indexes", Collection, List, &[]),
    // Writes.
    spec("insert_one", Collection, WriteResult, &["document"]),
    spec("insert_many", Collection, WriteResult, &["documents"]),
    spec("update_one", Collection, WriteResult, &["filter", "update"]),
    spec("update_many", Collection, WriteResult, &["filter", "update"]),
    spec("replace_one", Collection, WriteResult, &["filter", "replacement"]),
    spec("delete_one", Collection, WriteResult, &["filter"]),
    spec("delete_many", Collection, WriteResult, &["filter"]),
    // Single values.
    spec("find_one", Collection, SingleValue, &[]),
    spec("count_documents", Collection, SingleValue, &["filter"]),
    spec("estimated_document_count", Collection, SingleValue, &[]),
    spec("distinct", Collection, SingleValue, &["key"]),
    spec("find_one_and_delete", Collection, SingleValue, &["filter"]),
    spec("find_one_and_update", Collection, SingleValue, &["filter", "update"]),
    spec("find_one_and_replace", Collection, SingleValue, &["filter", "replacement"]),
    spec("drop", Collection, SingleValue, &[]),
    // Database operations.
    spec("list_collections", Database, List, &[]),
    spec("list_collection_names", Database, SingleValue, &[]),
    spec("create_collection", Database, SingleValue, &["name"]),
    spec("drop_collection", Database, SingleValue, &["name_or_collection"]),
    spec("command", Database, SingleValue, &["command"]),
];

/// Looks up a known operation by name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static OperationSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

/// All known operations, in catalog order.
pub fn known_operations() -> impl Iterator<Item = &'static OperationSpec> {
    CATALOG.iter()
}

/// An operation name resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Known(&'static OperationSpec),
    /// Not in the catalog; executed by name, result published unshaped.
    Passthrough(String),
}

impl Operation {
    #[must_use]
    pub fn resolve(name: &str) -> Self {
        lookup(name).map_or_else(|| Self::Passthrough(name.to_string()), Self::Known)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Known(spec) => spec.name,
            Self::Passthrough(name) => name,
        }
    }

    #[must_use]
    pub fn shape(&self) -> ResultShape {
        match self {
            Self::Known(spec) => spec.shape,
            Self::Passthrough(_) => ResultShape::SingleValue,
        }
    }

    /// Scope of a known operation; passthrough operations have none and are
    /// addressed wherever the topic points.
    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        match self {
            Self::Known(spec) => Some(spec.scope),
            Self::Passthrough(_) => None,
        }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
