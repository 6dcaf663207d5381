// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::RecordId;

/// Everything a table command can fail with. None of these are fatal: the
/// table stays usable and the caller surfaces the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    LoadFailure(String),
    ValidationFailure { field: String, max: usize },
    WriteFailure { id: RecordId, message: String },
    UnknownRecord(RecordId),
    NotEditable(RecordId),
    ReadOnlyField(String),
    AnotherRowEditing(RecordId),
    WriteInFlight(RecordId),
    ConfirmationOpen,
    NoPendingConfirmation,
    NothingSelected,
    BulkSelectDisabled,
    EditsPending,
    LoadInProgress,
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoadFailure(message) => write!(f, "load failed: {message}"),
            Self::ValidationFailure { field, max } => {
                write!(f, "{field} must be {max} characters or fewer")
            }
            Self::WriteFailure { id, message } => write!(f, "save {id} failed: {message}"),
            Self::UnknownRecord(id) => write!(f, "no record with id {id}"),
            Self::NotEditable(id) => write!(f, "record {id} is not in edit mode"),
            Self::ReadOnlyField(field) => write!(f, "{field} is read-only"),
            Self::AnotherRowEditing(id) => {
                write!(f, "finish editing {id} first (save or cancel)")
            }
            Self::WriteInFlight(id) => write!(f, "save for {id} still in flight"),
            Self::ConfirmationOpen => f.write_str("answer the open confirmation first"),
            Self::NoPendingConfirmation => f.write_str("nothing awaiting confirmation"),
            Self::NothingSelected => f.write_str("select at least one row"),
            Self::BulkSelectDisabled => f.write_str("bulk selection is off for this table"),
            Self::EditsPending => f.write_str("finish pending edits and saves first"),
            Self::LoadInProgress => f.write_str("records are still loading"),
        }
    }
}

impl std::error::Error for TableError {}
