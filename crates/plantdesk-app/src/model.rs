// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use time::OffsetDateTime;

use crate::ids::RecordId;

pub const DEFAULT_MAX_FIELD_LEN: usize = 25;
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(3);

/// One column of the table: what it shows and how it participates in search
/// and editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub key: String,
    pub label: String,
    #[serde(default = "default_column_width")]
    pub width: u16,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub editable: bool,
}

fn default_column_width() -> u16 {
    1
}

impl ColumnSpec {
    pub fn new(key: &str, label: &str, width: u16) -> Self {
        Self {
            key: key.to_owned(),
            label: label.to_owned(),
            width,
            searchable: false,
            editable: false,
        }
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TablePreset {
    PlantIds,
    Contacts,
    Diff,
}

impl TablePreset {
    pub const ALL: [Self; 3] = [Self::PlantIds, Self::Contacts, Self::Diff];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlantIds => "plant-ids",
            Self::Contacts => "contacts",
            Self::Diff => "diff",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "plant-ids" => Some(Self::PlantIds),
            "contacts" => Some(Self::Contacts),
            "diff" => Some(Self::Diff),
            _ => None,
        }
    }

    pub fn config(self) -> TableConfig {
        match self {
            Self::PlantIds => TableConfig {
                title: "plant info".to_owned(),
                subtitle: "update CRM_UNIT_ID and CRM_PLANT_ID".to_owned(),
                id_field: "MACHINESN".to_owned(),
                columns: vec![
                    ColumnSpec::new("MACHINESN", "MACHINESN", 1).searchable(),
                    ColumnSpec::new("FRAME", "FRAME", 1).searchable(),
                    ColumnSpec::new("PLANTADDRESS1", "PLANTADDRESS1", 1).searchable(),
                    ColumnSpec::new("PLANTNAME", "PLANTNAME", 1).searchable(),
                    ColumnSpec::new("UNITNAME", "UNITNAME", 1).searchable(),
                    ColumnSpec::new("CRM_PLANT_ID", "CRM_PLANT_ID", 1)
                        .searchable()
                        .editable(),
                    ColumnSpec::new("CRM_UNIT_ID", "CRM_UNIT_ID", 1)
                        .searchable()
                        .editable(),
                ],
                ..TableConfig::default()
            },
            Self::Contacts => TableConfig {
                title: "plant info".to_owned(),
                subtitle: "update contact email and phone".to_owned(),
                columns: vec![
                    ColumnSpec::new("id", "ID", 1),
                    ColumnSpec::new("title", "Title", 2).searchable(),
                    ColumnSpec::new("body", "Body", 3).searchable(),
                    ColumnSpec::new("username", "Username", 1).searchable(),
                    ColumnSpec::new("city", "City", 1).searchable(),
                    ColumnSpec::new("email", "Email", 1).editable(),
                    ColumnSpec::new("phone", "Phone", 1).editable(),
                ],
                ..TableConfig::default()
            },
            Self::Diff => TableConfig {
                title: "plant info".to_owned(),
                subtitle: "differences against the internal database".to_owned(),
                columns: vec![
                    ColumnSpec::new("id", "ID", 1),
                    ColumnSpec::new("status", "Status", 1),
                    ColumnSpec::new("title", "Title", 2).searchable(),
                    ColumnSpec::new("body", "Body", 2).searchable(),
                    ColumnSpec::new("username", "Username", 1).searchable(),
                    ColumnSpec::new("city", "City", 1).searchable(),
                    ColumnSpec::new("email", "Email", 1),
                    ColumnSpec::new("phone", "Phone", 1),
                ],
                write_fields: vec!["status".to_owned(), "title".to_owned()],
                bulk_select: true,
                ..TableConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub title: String,
    pub subtitle: String,
    pub id_field: String,
    pub columns: Vec<ColumnSpec>,
    /// Fields sent in the update body next to the id. Empty means "the
    /// editable columns".
    pub write_fields: Vec<String>,
    pub max_field_len: usize,
    pub notice_ttl: Duration,
    pub bulk_select: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            title: "records".to_owned(),
            subtitle: String::new(),
            id_field: "id".to_owned(),
            columns: Vec::new(),
            write_fields: Vec::new(),
            max_field_len: DEFAULT_MAX_FIELD_LEN,
            notice_ttl: DEFAULT_NOTICE_TTL,
            bulk_select: false,
        }
    }
}

impl TableConfig {
    pub fn column(&self, key: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|column| column.key == key)
    }

    pub fn is_editable(&self, field: &str) -> bool {
        self.column(field).is_some_and(|column| column.editable)
    }

    pub fn editable_fields(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|column| column.editable)
            .map(|column| column.key.as_str())
            .collect()
    }

    pub fn write_fields(&self) -> Vec<&str> {
        if self.write_fields.is_empty() {
            return self.editable_fields();
        }
        self.write_fields.iter().map(String::as_str).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.id_field.trim().is_empty() {
            bail!("table.id_field must not be empty");
        }
        if self.columns.is_empty() {
            bail!("table needs at least one column; add [[table.columns]] or pick a preset");
        }

        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if column.key.trim().is_empty() {
                bail!("table column keys must not be empty");
            }
            if !seen.insert(column.key.as_str()) {
                bail!("table column {:?} is listed twice", column.key);
            }
            if column.width == 0 {
                bail!("table column {:?} needs a width of at least 1", column.key);
            }
        }

        if self.is_editable(&self.id_field) {
            bail!(
                "id field {:?} cannot be editable; record identity never changes",
                self.id_field
            );
        }

        for field in &self.write_fields {
            if field == &self.id_field {
                bail!("table.write_fields must not repeat the id field {field:?}");
            }
            if self.column(field).is_none() {
                bail!("table.write_fields names unknown column {field:?}");
            }
        }

        if self.max_field_len == 0 {
            bail!("table.max_field_len must be positive");
        }
        if self.notice_ttl.is_zero() {
            bail!("table.notice_ttl must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    Row,
    Bulk,
}

/// Values captured when the user asked to save; the confirmation prompt
/// shows them and the update request sends exactly them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub id: RecordId,
    pub id_field: String,
    pub values: Vec<(String, Option<String>)>,
    pub origin: WriteOrigin,
}

impl PendingWrite {
    pub fn value(&self, field: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .and_then(|(_, value)| value.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowState {
    View,
    Editing,
    ConfirmPending(PendingWrite),
    Writing(PendingWrite),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPhase {
    View,
    Editing,
    ConfirmPending,
    Writing,
}

impl RowState {
    pub const fn phase(&self) -> RowPhase {
        match self {
            Self::View => RowPhase::View,
            Self::Editing => RowPhase::Editing,
            Self::ConfirmPending(_) => RowPhase::ConfirmPending,
            Self::Writing(_) => RowPhase::Writing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    fields: BTreeMap<String, String>,
    original_values: BTreeMap<String, Option<String>>,
    state: RowState,
}

impl Record {
    pub fn new(id: RecordId, fields: BTreeMap<String, String>) -> Self {
        Self {
            id,
            fields,
            original_values: BTreeMap::new(),
            state: RowState::View,
        }
    }

    pub fn with_field(mut self, field: &str, value: &str) -> Self {
        self.fields.insert(field.to_owned(), value.to_owned());
        self
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn display_value(&self, field: &str) -> &str {
        self.value(field).unwrap_or("")
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn original_value(&self, field: &str) -> Option<&str> {
        self.original_values.get(field).and_then(|value| value.as_deref())
    }

    pub fn state(&self) -> &RowState {
        &self.state
    }

    /// True while the row's inputs are active.
    pub fn is_editable(&self) -> bool {
        matches!(self.state, RowState::Editing | RowState::ConfirmPending(_))
    }

    pub(crate) fn set_state(&mut self, state: RowState) {
        self.state = state;
    }

    /// Leaves the row in `View` and hands back whatever state it had.
    pub(crate) fn take_state(&mut self) -> RowState {
        std::mem::replace(&mut self.state, RowState::View)
    }

    pub(crate) fn set_value(&mut self, field: &str, value: String) {
        self.fields.insert(field.to_owned(), value);
    }

    pub(crate) fn capture_originals(&mut self, editable: &[&str]) {
        self.original_values = editable
            .iter()
            .map(|field| ((*field).to_owned(), self.fields.get(*field).cloned()))
            .collect();
    }

    pub(crate) fn revert_to_originals(&mut self) {
        for (field, value) in &self.original_values {
            match value {
                Some(value) => {
                    self.fields.insert(field.clone(), value.clone());
                }
                None => {
                    self.fields.remove(field);
                }
            }
        }
    }

    pub(crate) fn commit_originals(&mut self, write: &PendingWrite) {
        for (field, value) in &write.values {
            if let Some(original) = self.original_values.get_mut(field) {
                *original = value.clone();
            }
        }
    }

    pub(crate) fn snapshot(
        &self,
        id_field: &str,
        fields: &[&str],
        origin: WriteOrigin,
    ) -> PendingWrite {
        PendingWrite {
            id: self.id.clone(),
            id_field: id_field.to_owned(),
            values: fields
                .iter()
                .map(|field| ((*field).to_owned(), self.fields.get(*field).cloned()))
                .collect(),
            origin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

impl NoticeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NoticeKind,
    pub message: String,
    pub token: u64,
    pub raised_at: OffsetDateTime,
}

impl Notification {
    /// Success notices go away on their own; errors wait for the user.
    pub const fn auto_dismiss(&self) -> bool {
        matches!(self.kind, NoticeKind::Success)
    }
}
