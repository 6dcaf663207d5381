// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeSet;
use time::OffsetDateTime;

use crate::{
    NoticeKind, Notification, PendingWrite, Record, RecordId, RowPhase, RowState, TableConfig,
    TableError, WriteOrigin, filter_records,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableCommand {
    BeginLoad,
    LoadSucceeded(Vec<Record>),
    LoadFailed(String),
    SetSearch(String),
    EnterEdit(RecordId),
    EditField {
        id: RecordId,
        field: String,
        value: String,
    },
    RequestSave(RecordId),
    ResolveConfirmation(bool),
    CancelEdit(RecordId),
    WriteSucceeded(RecordId),
    WriteFailed {
        id: RecordId,
        message: String,
    },
    ToggleSelect(RecordId),
    RequestBulkWrite,
    DismissNotification,
    ExpireNotification(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEvent {
    LoadStarted,
    RecordsReplaced(usize),
    LoadFailed(TableError),
    FilterChanged(String),
    RowChanged { id: RecordId, phase: RowPhase },
    FieldUpdated { id: RecordId, field: String },
    ValidationFailed(TableError),
    ConfirmationOpened(RecordId),
    BulkConfirmationOpened(usize),
    ConfirmationClosed,
    WriteRequested(PendingWrite),
    WriteFailed(TableError),
    SelectionChanged(usize),
    Notified(Notification),
    NotificationCleared,
    Rejected(TableError),
}

/// What the confirmation prompt currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation<'a> {
    Row {
        record: &'a Record,
        write: &'a PendingWrite,
    },
    Bulk(&'a [PendingWrite]),
}

/// The editable, searchable record table. Owns the record set exclusively;
/// every mutation goes through [`RecordTable::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTable {
    config: TableConfig,
    records: Vec<Record>,
    loading: bool,
    load_error: Option<TableError>,
    keyword: String,
    validation: Option<TableError>,
    notification: Option<Notification>,
    notice_token: u64,
    selection: BTreeSet<RecordId>,
    bulk_pending: Option<Vec<PendingWrite>>,
}

type Outcome = Result<Vec<TableEvent>, TableError>;

impl RecordTable {
    pub fn new(config: TableConfig) -> Self {
        Self {
            config,
            records: Vec::new(),
            loading: false,
            load_error: None,
            keyword: String::new(),
            validation: None,
            notification: None,
            notice_token: 0,
            selection: BTreeSet::new(),
            bulk_pending: None,
        }
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, id: &RecordId) -> Option<&Record> {
        self.records.iter().find(|record| &record.id == id)
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn load_error(&self) -> Option<&TableError> {
        self.load_error.as_ref()
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Inline message from the last rejected keystroke, if any.
    pub fn validation(&self) -> Option<&TableError> {
        self.validation.as_ref()
    }

    pub fn notification(&self) -> Option<&Notification> {
        self.notification.as_ref()
    }

    pub fn selection(&self) -> &BTreeSet<RecordId> {
        &self.selection
    }

    pub fn is_selected(&self, id: &RecordId) -> bool {
        self.selection.contains(id)
    }

    pub fn visible_records(&self) -> Vec<&Record> {
        filter_records(&self.records, &self.config.columns, &self.keyword)
    }

    /// First row whose inputs are active.
    pub fn active_edit(&self) -> Option<&Record> {
        self.records.iter().find(|record| record.is_editable())
    }

    pub fn has_busy_rows(&self) -> bool {
        self.records
            .iter()
            .any(|record| record.state().phase() != RowPhase::View)
    }

    pub fn confirmation(&self) -> Option<Confirmation<'_>> {
        if let Some(writes) = &self.bulk_pending {
            return Some(Confirmation::Bulk(writes));
        }
        self.records.iter().find_map(|record| match record.state() {
            RowState::ConfirmPending(write) => Some(Confirmation::Row { record, write }),
            _ => None,
        })
    }

    pub fn dispatch(&mut self, command: TableCommand) -> Vec<TableEvent> {
        let outcome = match command {
            TableCommand::BeginLoad => self.begin_load(),
            TableCommand::LoadSucceeded(records) => Ok(self.load_succeeded(records)),
            TableCommand::LoadFailed(message) => Ok(self.load_failed(message)),
            TableCommand::SetSearch(keyword) => {
                self.keyword = keyword.clone();
                Ok(vec![TableEvent::FilterChanged(keyword)])
            }
            TableCommand::EnterEdit(id) => self.enter_edit(id),
            TableCommand::EditField { id, field, value } => self.edit_field(id, field, value),
            TableCommand::RequestSave(id) => self.request_save(id),
            TableCommand::ResolveConfirmation(confirmed) => self.resolve_confirmation(confirmed),
            TableCommand::CancelEdit(id) => self.cancel_edit(id),
            TableCommand::WriteSucceeded(id) => Ok(self.write_succeeded(id)),
            TableCommand::WriteFailed { id, message } => Ok(self.write_failed(id, message)),
            TableCommand::ToggleSelect(id) => self.toggle_select(id),
            TableCommand::RequestBulkWrite => self.request_bulk_write(),
            TableCommand::DismissNotification => Ok(self.clear_notification(None)),
            TableCommand::ExpireNotification(token) => Ok(self.clear_notification(Some(token))),
        };

        match outcome {
            Ok(events) => events,
            Err(error) => vec![TableEvent::Rejected(error)],
        }
    }

    fn begin_load(&mut self) -> Outcome {
        if self.loading {
            return Ok(Vec::new());
        }
        if self.has_busy_rows() || self.bulk_pending.is_some() {
            return Err(TableError::EditsPending);
        }
        self.loading = true;
        self.load_error = None;
        Ok(vec![TableEvent::LoadStarted])
    }

    fn load_succeeded(&mut self, mut records: Vec<Record>) -> Vec<TableEvent> {
        let mut seen = BTreeSet::new();
        for record in &records {
            if !seen.insert(record.id.clone()) {
                return self.load_failed(format!("duplicate record id {}", record.id));
            }
        }

        let editable = self.config.editable_fields();
        for record in &mut records {
            record.set_state(RowState::View);
            record.capture_originals(&editable);
        }

        let count = records.len();
        self.records = records;
        self.loading = false;
        self.load_error = None;
        self.validation = None;
        self.selection.clear();
        self.bulk_pending = None;
        vec![TableEvent::RecordsReplaced(count)]
    }

    fn load_failed(&mut self, message: String) -> Vec<TableEvent> {
        self.records.clear();
        self.loading = false;
        self.selection.clear();
        self.bulk_pending = None;

        let error = TableError::LoadFailure(message);
        self.load_error = Some(error.clone());
        let notice = self.notify(NoticeKind::Error, error.to_string());
        vec![TableEvent::LoadFailed(error), TableEvent::Notified(notice)]
    }

    fn enter_edit(&mut self, id: RecordId) -> Outcome {
        self.ensure_loaded()?;
        if self.bulk_pending.is_some() {
            return Err(TableError::ConfirmationOpen);
        }
        if let Some(active) = self.active_edit()
            && active.id != id
        {
            return Err(TableError::AnotherRowEditing(active.id.clone()));
        }

        let record = find_mut(&mut self.records, &id)?;
        match record.state().phase() {
            RowPhase::View => {}
            RowPhase::Editing | RowPhase::ConfirmPending => return Ok(Vec::new()),
            RowPhase::Writing => return Err(TableError::WriteInFlight(id)),
        }

        record.revert_to_originals();
        record.set_state(RowState::Editing);
        self.validation = None;
        Ok(vec![TableEvent::RowChanged {
            id,
            phase: RowPhase::Editing,
        }])
    }

    fn edit_field(&mut self, id: RecordId, field: String, value: String) -> Outcome {
        if !self.config.is_editable(&field) {
            return Err(TableError::ReadOnlyField(field));
        }

        let max = self.config.max_field_len;
        let record = find_mut(&mut self.records, &id)?;
        match record.state().phase() {
            RowPhase::Editing => {}
            RowPhase::ConfirmPending => return Err(TableError::ConfirmationOpen),
            RowPhase::Writing => return Err(TableError::WriteInFlight(id)),
            RowPhase::View => return Err(TableError::NotEditable(id)),
        }

        if value.chars().count() > max {
            let error = TableError::ValidationFailure { field, max };
            self.validation = Some(error.clone());
            return Ok(vec![TableEvent::ValidationFailed(error)]);
        }

        record.set_value(&field, value);
        self.validation = None;
        Ok(vec![TableEvent::FieldUpdated { id, field }])
    }

    fn request_save(&mut self, id: RecordId) -> Outcome {
        self.ensure_loaded()?;
        if self.bulk_pending.is_some() {
            return Err(TableError::ConfirmationOpen);
        }
        if self
            .records
            .iter()
            .any(|record| record.id != id && record.state().phase() == RowPhase::ConfirmPending)
        {
            return Err(TableError::ConfirmationOpen);
        }

        let write_fields = self.config.write_fields();
        let record = find_mut(&mut self.records, &id)?;
        match record.state().phase() {
            RowPhase::Editing => {}
            RowPhase::ConfirmPending => return Err(TableError::ConfirmationOpen),
            RowPhase::Writing => return Err(TableError::WriteInFlight(id)),
            RowPhase::View => return Err(TableError::NotEditable(id)),
        }

        let write = record.snapshot(&self.config.id_field, &write_fields, WriteOrigin::Row);
        record.set_state(RowState::ConfirmPending(write));
        Ok(vec![
            TableEvent::RowChanged {
                id: id.clone(),
                phase: RowPhase::ConfirmPending,
            },
            TableEvent::ConfirmationOpened(id),
        ])
    }

    fn resolve_confirmation(&mut self, confirmed: bool) -> Outcome {
        if let Some(writes) = self.bulk_pending.take() {
            return Ok(self.resolve_bulk(writes, confirmed));
        }

        let record = self
            .records
            .iter_mut()
            .find(|record| record.state().phase() == RowPhase::ConfirmPending)
            .ok_or(TableError::NoPendingConfirmation)?;
        let id = record.id.clone();

        let events = match record.take_state() {
            RowState::ConfirmPending(write) if confirmed => {
                record.set_state(RowState::Writing(write.clone()));
                vec![
                    TableEvent::ConfirmationClosed,
                    TableEvent::RowChanged {
                        id,
                        phase: RowPhase::Writing,
                    },
                    TableEvent::WriteRequested(write),
                ]
            }
            RowState::ConfirmPending(_) => {
                record.revert_to_originals();
                vec![
                    TableEvent::ConfirmationClosed,
                    TableEvent::RowChanged {
                        id,
                        phase: RowPhase::View,
                    },
                ]
            }
            other => {
                record.set_state(other);
                return Err(TableError::NoPendingConfirmation);
            }
        };

        if !confirmed {
            self.validation = None;
        }
        Ok(events)
    }

    fn resolve_bulk(&mut self, writes: Vec<PendingWrite>, confirmed: bool) -> Vec<TableEvent> {
        let mut events = vec![TableEvent::ConfirmationClosed];
        if !confirmed {
            return events;
        }

        for write in writes {
            let Ok(record) = find_mut(&mut self.records, &write.id) else {
                continue;
            };
            if record.state().phase() != RowPhase::View {
                events.push(TableEvent::Rejected(TableError::EditsPending));
                continue;
            }
            record.set_state(RowState::Writing(write.clone()));
            events.push(TableEvent::RowChanged {
                id: write.id.clone(),
                phase: RowPhase::Writing,
            });
            events.push(TableEvent::WriteRequested(write));
        }
        events
    }

    fn cancel_edit(&mut self, id: RecordId) -> Outcome {
        let record = find_mut(&mut self.records, &id)?;
        match record.state().phase() {
            RowPhase::Editing | RowPhase::ConfirmPending => {}
            RowPhase::Writing => return Err(TableError::WriteInFlight(id)),
            RowPhase::View => return Err(TableError::NotEditable(id)),
        }

        record.revert_to_originals();
        record.set_state(RowState::View);
        self.validation = None;
        Ok(vec![TableEvent::RowChanged {
            id,
            phase: RowPhase::View,
        }])
    }

    fn write_succeeded(&mut self, id: RecordId) -> Vec<TableEvent> {
        let Ok(record) = find_mut(&mut self.records, &id) else {
            return Vec::new();
        };

        match record.take_state() {
            RowState::Writing(write) => {
                record.commit_originals(&write);
                self.selection.remove(&id);
                let notice = self.notify(NoticeKind::Success, format!("saved {id}"));
                vec![
                    TableEvent::RowChanged {
                        id,
                        phase: RowPhase::View,
                    },
                    TableEvent::Notified(notice),
                ]
            }
            other => {
                record.set_state(other);
                Vec::new()
            }
        }
    }

    fn write_failed(&mut self, id: RecordId, message: String) -> Vec<TableEvent> {
        let Ok(record) = find_mut(&mut self.records, &id) else {
            return Vec::new();
        };

        match record.take_state() {
            RowState::Writing(write) => {
                let phase = match write.origin {
                    WriteOrigin::Row => {
                        record.set_state(RowState::Editing);
                        RowPhase::Editing
                    }
                    WriteOrigin::Bulk => RowPhase::View,
                };
                let error = TableError::WriteFailure {
                    id: id.clone(),
                    message,
                };
                let notice = self.notify(NoticeKind::Error, error.to_string());
                vec![
                    TableEvent::RowChanged { id, phase },
                    TableEvent::WriteFailed(error),
                    TableEvent::Notified(notice),
                ]
            }
            other => {
                record.set_state(other);
                Vec::new()
            }
        }
    }

    fn toggle_select(&mut self, id: RecordId) -> Outcome {
        if !self.config.bulk_select {
            return Err(TableError::BulkSelectDisabled);
        }
        self.ensure_loaded()?;
        if self.bulk_pending.is_some() {
            return Err(TableError::ConfirmationOpen);
        }
        let record = self
            .record(&id)
            .ok_or_else(|| TableError::UnknownRecord(id.clone()))?;
        if record.state().phase() == RowPhase::Writing {
            return Err(TableError::WriteInFlight(id));
        }

        if !self.selection.remove(&id) {
            self.selection.insert(id);
        }
        Ok(vec![TableEvent::SelectionChanged(self.selection.len())])
    }

    fn request_bulk_write(&mut self) -> Outcome {
        if !self.config.bulk_select {
            return Err(TableError::BulkSelectDisabled);
        }
        self.ensure_loaded()?;
        if self.confirmation().is_some() {
            return Err(TableError::ConfirmationOpen);
        }
        if self.selection.is_empty() {
            return Err(TableError::NothingSelected);
        }

        let write_fields = self.config.write_fields();
        let mut writes = Vec::with_capacity(self.selection.len());
        for record in self
            .records
            .iter()
            .filter(|record| self.selection.contains(&record.id))
        {
            if record.state().phase() != RowPhase::View {
                return Err(TableError::EditsPending);
            }
            writes.push(record.snapshot(&self.config.id_field, &write_fields, WriteOrigin::Bulk));
        }

        let count = writes.len();
        self.bulk_pending = Some(writes);
        Ok(vec![TableEvent::BulkConfirmationOpened(count)])
    }

    /// Rows shown during a load are about to be replaced, so nothing may
    /// start on them.
    fn ensure_loaded(&self) -> Result<(), TableError> {
        if self.loading {
            return Err(TableError::LoadInProgress);
        }
        Ok(())
    }

    fn clear_notification(&mut self, token: Option<u64>) -> Vec<TableEvent> {
        let matches = match (&self.notification, token) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(notice), Some(token)) => notice.token == token,
        };
        if !matches {
            return Vec::new();
        }
        self.notification = None;
        vec![TableEvent::NotificationCleared]
    }

    fn notify(&mut self, kind: NoticeKind, message: String) -> Notification {
        self.notice_token = self.notice_token.saturating_add(1);
        let notice = Notification {
            kind,
            message,
            token: self.notice_token,
            raised_at: OffsetDateTime::now_utc(),
        };
        self.notification = Some(notice.clone());
        notice
    }
}

fn find_mut<'a>(records: &'a mut [Record], id: &RecordId) -> Result<&'a mut Record, TableError> {
    records
        .iter_mut()
        .find(|record| &record.id == id)
        .ok_or_else(|| TableError::UnknownRecord(id.clone()))
}
