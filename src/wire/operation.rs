//! Classification of command documents into write operations.

use std::fmt;

use bson::Document;
use serde::Serialize;

/// Write command families worth auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    FindAndModify,
}

impl OperationKind {
    /// Checked in this order; the first key holding a string wins.
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Insert,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::FindAndModify,
    ];

    /// The command name as it appears as a top-level key.
    pub fn command_name(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::FindAndModify => "findAndModify",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

/// Target namespace and kind of a recognised write command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationInfo {
    pub database: String,
    pub collection: String,
    pub kind: OperationKind,
}

impl OperationInfo {
    /// `database.collection`
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

/// Recognise a write command.
///
/// The command key is the first name in [`OperationKind::ALL`] whose value
/// is a string. A key holding anything else is a command argument, such as
/// the `update` document of a findAndModify.
///
/// Returns `None` for reads, administrative commands, heartbeats, and for
/// documents without a string `$db`.
pub fn classify_operation(document: &Document) -> Option<OperationInfo> {
    let (kind, collection) = OperationKind::ALL
        .into_iter()
        .find_map(|kind| Some((kind, document.get_str(kind.command_name()).ok()?)))?;

    let database = document.get_str("$db").ok()?;

    Some(OperationInfo {
        database: database.to_string(),
        collection: collection.to_string(),
        kind,
    })
}
