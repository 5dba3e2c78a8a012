//! Derivation of the documents a write command touched.
//!
//! Used by enrichment to find post-write snapshots. Deletes are derived too,
//! but there is nothing left to fetch for them.

use bson::{Bson, Document};

use crate::wire::{OperationInfo, OperationKind};

/// How to locate the documents affected by a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteTarget {
    /// Documents matching `filter`; only the first one unless `many`.
    Filter { filter: Document, many: bool },
    /// Documents with these `_id`s.
    Ids(Vec<Bson>),
}

/// Summary of a write command's reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub ok: bool,
    pub affected: Option<i64>,
    pub modified: Option<i64>,
    /// Indexes into the command's statements that failed.
    pub failed_indexes: Vec<i64>,
}

impl WriteOutcome {
    pub fn from_response(response: &Document) -> Self {
        let failed_indexes = response
            .get_array("writeErrors")
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(Bson::as_document)
                    .filter_map(|err| err.get("index").and_then(as_i64))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            ok: response.get("ok").map_or(false, is_truthy),
            affected: response.get("n").and_then(as_i64),
            modified: response.get("nModified").and_then(as_i64),
            failed_indexes,
        }
    }
}

/// Targets for `command`, given the upstream's `response`.
pub fn derive_targets(info: &OperationInfo, command: &Document, response: &Document) -> Vec<WriteTarget> {
    match info.kind {
        OperationKind::FindAndModify => vec![WriteTarget::Filter {
            filter: command.get_document("query").cloned().unwrap_or_default(),
            many: false,
        }],
        OperationKind::Update => statements(command, "updates")
            .map(|statement| WriteTarget::Filter {
                filter: statement.get_document("q").cloned().unwrap_or_default(),
                many: statement.get_bool("multi").unwrap_or(false),
            })
            .collect(),
        OperationKind::Delete => statements(command, "deletes")
            .map(|statement| WriteTarget::Filter {
                filter: statement.get_document("q").cloned().unwrap_or_default(),
                many: statement.get("limit").and_then(as_i64) == Some(0),
            })
            .collect(),
        OperationKind::Insert => {
            let failed = WriteOutcome::from_response(response).failed_indexes;
            let ids: Vec<Bson> = statements(command, "documents")
                .enumerate()
                .filter(|(index, _)| !failed.contains(&(*index as i64)))
                .filter_map(|(_, document)| document.get("_id").cloned())
                .collect();
            if ids.is_empty() {
                Vec::new()
            } else {
                vec![WriteTarget::Ids(ids)]
            }
        }
    }
}

fn statements<'a>(command: &'a Document, key: &str) -> impl Iterator<Item = &'a Document> + 'a {
    command
        .get_array(key)
        .into_iter()
        .flatten()
        .filter_map(Bson::as_document)
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(v) => *v,
        Bson::Int32(v) => *v != 0,
        Bson::Int64(v) => *v != 0,
        Bson::Double(v) => *v != 0.0,
        _ => false,
    }
}
