// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use plantdesk_app::{
    Confirmation, NoticeKind, Notification, PendingWrite, Record, RecordId, RecordTable,
    RowPhase, TableCommand, TableEvent,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use time::macros::format_description;

const PLACEHOLDER_ROWS: usize = 10;
const PLACEHOLDER_CELL: &str = "░░░░░░";
const STATUS_CLEAR_DELAY: Duration = Duration::from_secs(4);
const NEW_STATUS: &str = "新規";
const CURSOR: &str = "▏";

/// Everything the TUI needs from the outside world. The `spawn_*` defaults
/// run inline; real runtimes move the work onto threads.
pub trait AppRuntime {
    fn load_records(&mut self) -> Result<Vec<Record>>;
    fn submit_update(&mut self, write: &PendingWrite) -> Result<()>;

    fn spawn_load(&mut self, tx: Sender<InternalEvent>) -> Result<()> {
        let result = self.load_records().map_err(|error| format!("{error:#}"));
        tx.send(InternalEvent::LoadFinished(result))
            .map_err(|_| anyhow!("load event channel closed"))?;
        Ok(())
    }

    fn spawn_update(&mut self, write: PendingWrite, tx: Sender<InternalEvent>) -> Result<()> {
        let result = self
            .submit_update(&write)
            .map_err(|error| format!("{error:#}"));
        tx.send(InternalEvent::WriteFinished { id: write.id, result })
            .map_err(|_| anyhow!("write event channel closed"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalEvent {
    ClearStatus { token: u64 },
    ExpireNotification { token: u64 },
    LoadFinished(Result<Vec<Record>, String>),
    WriteFinished {
        id: RecordId,
        result: Result<(), String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum InputMode {
    #[default]
    Nav,
    Search,
    Edit {
        id: RecordId,
        field_index: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ViewData {
    mode: InputMode,
    selected_row: usize,
    selected_col: usize,
    help_visible: bool,
    status_line: Option<String>,
    status_token: u64,
}

pub fn run_app<R: AppRuntime>(table: &mut RecordTable, runtime: &mut R) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData::default();
    let (internal_tx, internal_rx) = mpsc::channel();

    dispatch(
        table,
        runtime,
        &mut view_data,
        &internal_tx,
        TableCommand::BeginLoad,
    );

    let mut result = Ok(());
    loop {
        process_internal_events(table, runtime, &mut view_data, &internal_tx, &internal_rx);

        if let Err(error) = terminal.draw(|frame| render(frame, table, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = event::poll(Duration::from_millis(120)).context("poll event")?;
        if has_event
            && let Event::Key(key) = event::read().context("read event")?
            && handle_key_event(table, runtime, &mut view_data, &internal_tx, key)
        {
            break;
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events<R: AppRuntime>(
    table: &mut RecordTable,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        let command = match event {
            InternalEvent::ClearStatus { token } => {
                if token == view_data.status_token {
                    view_data.status_line = None;
                }
                continue;
            }
            InternalEvent::ExpireNotification { token } => TableCommand::ExpireNotification(token),
            InternalEvent::LoadFinished(Ok(records)) => TableCommand::LoadSucceeded(records),
            InternalEvent::LoadFinished(Err(message)) => TableCommand::LoadFailed(message),
            InternalEvent::WriteFinished { id, result: Ok(()) } => {
                TableCommand::WriteSucceeded(id)
            }
            InternalEvent::WriteFinished {
                id,
                result: Err(message),
            } => TableCommand::WriteFailed { id, message },
        };
        dispatch(table, runtime, view_data, tx, command);
    }
}

/// Run `command` and everything its events trigger (workers, timers,
/// follow-up failures), then bring the view back in line with the table.
fn dispatch<R: AppRuntime>(
    table: &mut RecordTable,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    command: TableCommand,
) {
    let notice_ttl = table.config().notice_ttl;
    let mut pending = VecDeque::from([command]);
    while let Some(command) = pending.pop_front() {
        for event in table.dispatch(command) {
            if let Some(follow_up) = handle_table_event(runtime, view_data, tx, notice_ttl, event)
            {
                pending.push_back(follow_up);
            }
        }
    }
    sync_view(table, view_data);
}

fn handle_table_event<R: AppRuntime>(
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    notice_ttl: Duration,
    event: TableEvent,
) -> Option<TableCommand> {
    match event {
        TableEvent::LoadStarted => {
            tracing::info!("loading records");
            if let Err(error) = runtime.spawn_load(tx.clone()) {
                return Some(TableCommand::LoadFailed(format!("{error:#}")));
            }
        }
        TableEvent::RecordsReplaced(count) => {
            tracing::info!(count, "records replaced");
            view_data.selected_row = 0;
            emit_status(view_data, tx, format!("loaded {count} records"));
        }
        TableEvent::LoadFailed(error) => {
            tracing::error!(%error, "load failed");
        }
        TableEvent::WriteRequested(write) => {
            tracing::info!(id = %write.id, fields = write.values.len(), "write requested");
            let id = write.id.clone();
            if let Err(error) = runtime.spawn_update(write, tx.clone()) {
                return Some(TableCommand::WriteFailed {
                    id,
                    message: format!("{error:#}"),
                });
            }
        }
        TableEvent::WriteFailed(error) => {
            tracing::error!(%error, "write failed");
        }
        TableEvent::ValidationFailed(error) => {
            tracing::debug!(%error, "edit rejected");
        }
        TableEvent::Notified(notice) => {
            if notice.kind == NoticeKind::Success {
                tracing::info!(message = %notice.message, "write succeeded");
            }
            if notice.auto_dismiss() {
                schedule_notice_expiry(tx, notice.token, notice_ttl);
            }
        }
        TableEvent::Rejected(error) => {
            tracing::debug!(%error, "command rejected");
            emit_status(view_data, tx, error.to_string());
        }
        TableEvent::FilterChanged(_) => {
            view_data.selected_row = 0;
        }
        TableEvent::BulkConfirmationOpened(count) => {
            tracing::debug!(count, "bulk confirmation opened");
        }
        TableEvent::SelectionChanged(count) => {
            emit_status(view_data, tx, format!("{count} selected"));
        }
        TableEvent::RowChanged { .. }
        | TableEvent::FieldUpdated { .. }
        | TableEvent::ConfirmationOpened(_)
        | TableEvent::ConfirmationClosed
        | TableEvent::NotificationCleared => {}
    }
    None
}

fn sync_view(table: &RecordTable, view_data: &mut ViewData) {
    if let InputMode::Edit { id, .. } = &view_data.mode
        && !table.record(id).is_some_and(Record::is_editable)
    {
        view_data.mode = InputMode::Nav;
    }

    let visible = table.visible_records().len();
    view_data.selected_row = view_data.selected_row.min(visible.saturating_sub(1));
    let columns = table.config().columns.len();
    view_data.selected_col = view_data.selected_col.min(columns.saturating_sub(1));
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(STATUS_CLEAR_DELAY);
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn schedule_notice_expiry(internal_tx: &Sender<InternalEvent>, token: u64, ttl: Duration) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(ttl);
        let _ = sender.send(InternalEvent::ExpireNotification { token });
    });
}

fn emit_status(
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    message: impl Into<String>,
) {
    view_data.status_line = Some(message.into());
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token);
}

fn selected_id(table: &RecordTable, view_data: &ViewData) -> Option<RecordId> {
    table
        .visible_records()
        .get(view_data.selected_row)
        .map(|record| record.id.clone())
}

fn handle_key_event<R: AppRuntime>(
    table: &mut RecordTable,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if table.confirmation().is_some() {
        handle_confirmation_key(table, runtime, view_data, internal_tx, key);
        return false;
    }

    if view_data.help_visible {
        if key.code == KeyCode::Esc || key.code == KeyCode::Char('?') {
            view_data.help_visible = false;
        }
        return false;
    }

    match view_data.mode.clone() {
        InputMode::Search => {
            handle_search_key(table, runtime, view_data, internal_tx, key);
            false
        }
        InputMode::Edit { id, field_index } => {
            handle_edit_key(table, runtime, view_data, internal_tx, key, id, field_index);
            false
        }
        InputMode::Nav => handle_nav_key(table, runtime, view_data, internal_tx, key),
    }
}

fn handle_confirmation_key<R: AppRuntime>(
    table: &mut RecordTable,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let confirmed = match key.code {
        KeyCode::Char('y') | KeyCode::Enter => true,
        KeyCode::Char('n') | KeyCode::Esc => false,
        _ => return,
    };
    dispatch(
        table,
        runtime,
        view_data,
        internal_tx,
        TableCommand::ResolveConfirmation(confirmed),
    );
}

fn handle_search_key<R: AppRuntime>(
    table: &mut RecordTable,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let mut keyword = table.keyword().to_owned();
    match key.code {
        KeyCode::Enter => {
            view_data.mode = InputMode::Nav;
            return;
        }
        KeyCode::Esc => {
            view_data.mode = InputMode::Nav;
            keyword.clear();
        }
        KeyCode::Backspace => {
            keyword.pop();
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => keyword.clear(),
        KeyCode::Char(ch) => keyword.push(ch),
        _ => return,
    }
    if keyword != table.keyword() {
        dispatch(
            table,
            runtime,
            view_data,
            internal_tx,
            TableCommand::SetSearch(keyword),
        );
    }
}

fn handle_edit_key<R: AppRuntime>(
    table: &mut RecordTable,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
    id: RecordId,
    field_index: usize,
) {
    let editable: Vec<String> = table
        .config()
        .editable_fields()
        .into_iter()
        .map(str::to_owned)
        .collect();
    let Some(field) = editable.get(field_index).cloned() else {
        view_data.mode = InputMode::Nav;
        return;
    };
    let current = table
        .record(&id)
        .map(|record| record.display_value(&field).to_owned())
        .unwrap_or_default();

    let value = match key.code {
        KeyCode::Esc => {
            dispatch(table, runtime, view_data, internal_tx, TableCommand::CancelEdit(id));
            return;
        }
        KeyCode::Enter => {
            dispatch(table, runtime, view_data, internal_tx, TableCommand::RequestSave(id));
            return;
        }
        KeyCode::Tab | KeyCode::BackTab => {
            let len = editable.len();
            let next = if key.code == KeyCode::Tab {
                (field_index + 1) % len
            } else {
                (field_index + len - 1) % len
            };
            view_data.mode = InputMode::Edit {
                id,
                field_index: next,
            };
            return;
        }
        KeyCode::Backspace => {
            let mut value = current;
            value.pop();
            value
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => String::new(),
        KeyCode::Char(ch) => {
            let mut value = current;
            value.push(ch);
            value
        }
        _ => return,
    };

    dispatch(
        table,
        runtime,
        view_data,
        internal_tx,
        TableCommand::EditField { id, field, value },
    );
}

fn handle_nav_key<R: AppRuntime>(
    table: &mut RecordTable,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    let visible = table.visible_records().len();
    let columns = table.config().columns.len();
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('j') | KeyCode::Down => {
            if view_data.selected_row + 1 < visible {
                view_data.selected_row += 1;
            }
        }
        KeyCode::Char('k') | KeyCode::Up => {
            view_data.selected_row = view_data.selected_row.saturating_sub(1);
        }
        KeyCode::Char('l') | KeyCode::Right => {
            if view_data.selected_col + 1 < columns {
                view_data.selected_col += 1;
            }
        }
        KeyCode::Char('h') | KeyCode::Left => {
            view_data.selected_col = view_data.selected_col.saturating_sub(1);
        }
        KeyCode::Char('g') => view_data.selected_row = 0,
        KeyCode::Char('G') => view_data.selected_row = visible.saturating_sub(1),
        KeyCode::Char('/') => view_data.mode = InputMode::Search,
        KeyCode::Char('?') => view_data.help_visible = true,
        KeyCode::Char('e') | KeyCode::Char('i') => {
            if table.config().editable_fields().is_empty() {
                emit_status(view_data, internal_tx, "no editable columns in this table");
                return false;
            }
            let Some(id) = selected_id(table, view_data) else {
                return false;
            };
            dispatch(
                table,
                runtime,
                view_data,
                internal_tx,
                TableCommand::EnterEdit(id.clone()),
            );
            if table.record(&id).is_some_and(Record::is_editable) {
                view_data.mode = InputMode::Edit { id, field_index: 0 };
            }
        }
        KeyCode::Char(' ') => {
            if let Some(id) = selected_id(table, view_data) {
                dispatch(
                    table,
                    runtime,
                    view_data,
                    internal_tx,
                    TableCommand::ToggleSelect(id),
                );
            }
        }
        KeyCode::Char('w') => dispatch(
            table,
            runtime,
            view_data,
            internal_tx,
            TableCommand::RequestBulkWrite,
        ),
        KeyCode::Char('r') => dispatch(
            table,
            runtime,
            view_data,
            internal_tx,
            TableCommand::BeginLoad,
        ),
        KeyCode::Char('x') => dispatch(
            table,
            runtime,
            view_data,
            internal_tx,
            TableCommand::DismissNotification,
        ),
        KeyCode::Esc if !table.keyword().is_empty() => dispatch(
            table,
            runtime,
            view_data,
            internal_tx,
            TableCommand::SetSearch(String::new()),
        ),
        _ => {}
    }
    false
}

fn render(frame: &mut ratatui::Frame<'_>, table: &RecordTable, view_data: &ViewData) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(2),
        ])
        .split(frame.area());

    let config = table.config();
    let header = Paragraph::new(config.subtitle.clone())
        .block(Block::default().title(config.title.clone()).borders(Borders::ALL));
    frame.render_widget(header, layout[0]);

    if let Some(notice) = table.notification() {
        let color = match notice.kind {
            NoticeKind::Success => Color::Green,
            NoticeKind::Error => Color::Red,
        };
        let banner = Paragraph::new(notification_text(notice))
            .style(Style::default().fg(Color::Black).bg(color));
        frame.render_widget(banner, layout[1]);
    }

    let search_style = if view_data.mode == InputMode::Search {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let search = Paragraph::new(search_text(table, view_data))
        .block(
            Block::default()
                .title("search")
                .borders(Borders::ALL)
                .border_style(search_style),
        );
    frame.render_widget(search, layout[2]);

    if let Some(error) = table.validation() {
        let validation =
            Paragraph::new(error.to_string()).style(Style::default().fg(Color::Red));
        frame.render_widget(validation, layout[3]);
    }

    render_table(frame, layout[4], table, view_data);

    let status = Paragraph::new(status_text(table, view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(status, layout[5]);

    if let Some(confirmation) = table.confirmation() {
        let area = centered_rect(60, 45, frame.area());
        frame.render_widget(Clear, area);
        let prompt = Paragraph::new(confirmation_text(&confirmation)).block(
            Block::default()
                .title("confirm")
                .borders(Borders::ALL)
                .style(Style::default().fg(Color::Cyan)),
        );
        frame.render_widget(prompt, area);
    }

    if view_data.help_visible {
        let area = centered_rect(70, 60, frame.area());
        frame.render_widget(Clear, area);
        let help = Paragraph::new(help_overlay_text())
            .block(Block::default().title("help").borders(Borders::ALL));
        frame.render_widget(help, area);
    }
}

fn render_table(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    table: &RecordTable,
    view_data: &ViewData,
) {
    let config = table.config();
    let block = Block::default()
        .title(table_title(table))
        .borders(Borders::ALL);

    if !table.loading()
        && let Some(error) = table.load_error()
    {
        let message = Paragraph::new(format!("{error}\n\npress r to retry"))
            .style(Style::default().fg(Color::Red))
            .block(block);
        frame.render_widget(message, area);
        return;
    }

    let bulk = config.bulk_select;
    let total_width: u32 = config.columns.iter().map(|column| u32::from(column.width)).sum();
    let mut widths = Vec::with_capacity(config.columns.len() + 2);
    if bulk {
        widths.push(Constraint::Length(3));
    }
    widths.extend(
        config
            .columns
            .iter()
            .map(|column| Constraint::Ratio(u32::from(column.width), total_width.max(1))),
    );
    widths.push(Constraint::Length(12));

    let mut header_cells = Vec::with_capacity(widths.len());
    if bulk {
        header_cells.push(Cell::from(""));
    }
    header_cells.extend(config.columns.iter().map(|column| Cell::from(column.label.clone())));
    header_cells.push(Cell::from("actions"));
    let header = Row::new(header_cells).style(
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );

    let rows: Vec<Row<'_>> = if table.loading() {
        (0..PLACEHOLDER_ROWS)
            .map(|_| {
                Row::new(vec![Cell::from(PLACEHOLDER_CELL); widths.len()])
                    .style(Style::default().fg(Color::DarkGray))
            })
            .collect()
    } else {
        table
            .visible_records()
            .into_iter()
            .enumerate()
            .map(|(row_index, record)| {
                table_row(table, view_data, record, row_index == view_data.selected_row)
            })
            .collect()
    };

    let widget = Table::new(rows, widths)
        .header(header)
        .column_spacing(1)
        .block(block);
    frame.render_widget(widget, area);
}

fn table_row<'a>(
    table: &RecordTable,
    view_data: &ViewData,
    record: &'a Record,
    selected_row: bool,
) -> Row<'a> {
    let config = table.config();
    let focused_field = match &view_data.mode {
        InputMode::Edit { id, field_index } if id == &record.id => config
            .editable_fields()
            .get(*field_index)
            .map(|field| (*field).to_owned()),
        _ => None,
    };

    let mut row_style = status_style(record);
    if record.state().phase() == RowPhase::Writing {
        row_style = row_style.fg(Color::DarkGray).add_modifier(Modifier::ITALIC);
    }
    if selected_row {
        row_style = row_style.bg(Color::DarkGray);
    }

    let mut cells = Vec::with_capacity(config.columns.len() + 2);
    if config.bulk_select {
        let mark = if table.is_selected(&record.id) { "[x]" } else { "[ ]" };
        cells.push(Cell::from(mark));
    }

    for (column_index, column) in config.columns.iter().enumerate() {
        let value = record.display_value(&column.key);
        let is_focused = focused_field.as_deref() == Some(column.key.as_str());
        let cell = if is_focused {
            Cell::from(format!("{value}{CURSOR}")).style(
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )
        } else if record.is_editable() && column.editable {
            Cell::from(value).style(Style::default().add_modifier(Modifier::UNDERLINED))
        } else if selected_row
            && view_data.mode == InputMode::Nav
            && column_index == view_data.selected_col
        {
            Cell::from(value).style(Style::default().add_modifier(Modifier::REVERSED))
        } else {
            Cell::from(value)
        };
        cells.push(cell);
    }
    cells.push(Cell::from(action_label(table, record)));

    Row::new(cells).style(row_style)
}

fn status_style(record: &Record) -> Style {
    match record.value("status") {
        Some(NEW_STATUS) => Style::default().fg(Color::Green),
        Some(status) if !status.is_empty() => Style::default().fg(Color::Blue),
        _ => Style::default(),
    }
}

fn action_label(table: &RecordTable, record: &Record) -> &'static str {
    match record.state().phase() {
        RowPhase::View if table.config().editable_fields().is_empty() => "",
        RowPhase::View => "e edit",
        RowPhase::Editing => "save/cancel",
        RowPhase::ConfirmPending => "confirm?",
        RowPhase::Writing => "saving…",
    }
}

fn table_title(table: &RecordTable) -> String {
    if table.loading() {
        return "loading…".to_owned();
    }
    let total = table.records().len();
    let visible = table.visible_records().len();
    let mut title = if visible == total {
        format!("{total} records")
    } else {
        format!("{visible}/{total} records")
    };
    if table.config().bulk_select {
        title.push_str(&format!(" | {} selected", table.selection().len()));
    }
    title
}

fn search_text(table: &RecordTable, view_data: &ViewData) -> String {
    if view_data.mode == InputMode::Search {
        return format!("{}{CURSOR}", table.keyword());
    }
    if table.keyword().is_empty() {
        return "/ to search".to_owned();
    }
    table.keyword().to_owned()
}

fn notification_text(notice: &Notification) -> String {
    let clock = notice
        .raised_at
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default();
    let hint = if notice.auto_dismiss() {
        ""
    } else {
        " (x to dismiss)"
    };
    format!(" {clock}Z {}: {}{hint}", notice.kind.as_str(), notice.message)
}

fn confirmation_text(confirmation: &Confirmation<'_>) -> String {
    match confirmation {
        Confirmation::Row { record, write } => {
            let header = format!("save {} = {}?", write.id_field, record.id);
            let mut lines = vec![header, String::new()];
            lines.extend(write_lines(write));
            lines.push(String::new());
            lines.push("y/enter confirm | n/esc cancel".to_owned());
            lines.join("\n")
        }
        Confirmation::Bulk(writes) => {
            let mut lines = vec![format!("write {} records?", writes.len()), String::new()];
            for write in writes.iter() {
                let values = write
                    .values
                    .iter()
                    .map(|(field, value)| format!("{field}={}", value.as_deref().unwrap_or("")))
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("{} {}: {values}", write.id_field, write.id));
            }
            lines.push(String::new());
            lines.push("y/enter confirm | n/esc cancel".to_owned());
            lines.join("\n")
        }
    }
}

fn write_lines(write: &PendingWrite) -> Vec<String> {
    write
        .values
        .iter()
        .map(|(field, value)| match value {
            Some(value) => format!("  {field}: {value}"),
            None => format!("  {field}: (unset)"),
        })
        .collect()
}

fn help_overlay_text() -> &'static str {
    "global: ctrl+q quit | ? help\n\
nav: j/k/h/l g/G | / search | esc clear search | e/i edit | r reload | x dismiss | q quit\n\
bulk: space select | w write selected\n\
search: type to filter | backspace | ctrl+u clear | enter keep | esc clear\n\
edit: type | backspace | ctrl+u clear | tab/shift+tab field | enter save | esc cancel\n\
confirm: y/enter write | n/esc discard"
}

fn status_text(table: &RecordTable, view_data: &ViewData) -> String {
    if view_data.help_visible || table.confirmation().is_some() {
        return String::new();
    }

    let (mode, hints) = match &view_data.mode {
        InputMode::Nav if table.config().bulk_select => (
            "NAV",
            "j/k/h/l g/G | / search | space select w write | r reload | x dismiss | ? help | q",
        ),
        InputMode::Nav => (
            "NAV",
            "j/k/h/l g/G | / search | e edit | r reload | x dismiss | ? help | q",
        ),
        InputMode::Search => ("SEARCH", "type to filter | enter keep | esc clear"),
        InputMode::Edit { .. } => ("EDIT", "tab field | enter save | esc cancel"),
    };

    let field = match &view_data.mode {
        InputMode::Edit { field_index, .. } => table
            .config()
            .editable_fields()
            .get(*field_index)
            .map(|field| format!("{field} | ")),
        _ => None,
    }
    .unwrap_or_default();

    match &view_data.status_line {
        Some(status) => format!("{mode} | {field}{status} | {hints}"),
        None => format!("{mode} | {field}{hints}"),
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::{
        AppRuntime, InputMode, InternalEvent, ViewData, action_label, confirmation_text,
        handle_key_event, notification_text, process_internal_events, status_style, status_text,
        table_title,
    };
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use plantdesk_app::{
        ColumnSpec, NoticeKind, PendingWrite, Record, RecordId, RecordTable, RowPhase,
        TableCommand, TableConfig,
    };
    use plantdesk_testkit::{name_record, name_table_config, two_records};
    use ratatui::style::Color;
    use std::collections::BTreeMap;
    use std::sync::mpsc;

    #[derive(Debug, Default)]
    struct TestRuntime {
        records: Vec<Record>,
        load_error: Option<String>,
        update_error: Option<String>,
        load_calls: usize,
        submitted: Vec<PendingWrite>,
    }

    impl TestRuntime {
        fn with_records(records: Vec<Record>) -> Self {
            Self {
                records,
                ..Self::default()
            }
        }
    }

    impl AppRuntime for TestRuntime {
        fn load_records(&mut self) -> anyhow::Result<Vec<Record>> {
            self.load_calls += 1;
            match &self.load_error {
                Some(message) => Err(anyhow::anyhow!(message.clone())),
                None => Ok(self.records.clone()),
            }
        }

        fn submit_update(&mut self, write: &PendingWrite) -> anyhow::Result<()> {
            self.submitted.push(write.clone());
            match &self.update_error {
                Some(message) => Err(anyhow::anyhow!(message.clone())),
                None => Ok(()),
            }
        }
    }

    struct Harness {
        table: RecordTable,
        runtime: TestRuntime,
        view_data: ViewData,
        tx: mpsc::Sender<InternalEvent>,
        rx: mpsc::Receiver<InternalEvent>,
    }

    impl Harness {
        fn new(config: TableConfig, runtime: TestRuntime) -> Self {
            let (tx, rx) = mpsc::channel();
            let mut harness = Self {
                table: RecordTable::new(config),
                runtime,
                view_data: ViewData::default(),
                tx,
                rx,
            };
            super::dispatch(
                &mut harness.table,
                &mut harness.runtime,
                &mut harness.view_data,
                &harness.tx,
                TableCommand::BeginLoad,
            );
            harness.pump();
            harness
        }

        fn names() -> Self {
            Self::new(name_table_config(), TestRuntime::with_records(two_records()))
        }

        fn pump(&mut self) {
            process_internal_events(
                &mut self.table,
                &mut self.runtime,
                &mut self.view_data,
                &self.tx,
                &self.rx,
            );
        }

        fn press(&mut self, key: KeyEvent) -> bool {
            let quit = handle_key_event(
                &mut self.table,
                &mut self.runtime,
                &mut self.view_data,
                &self.tx,
                key,
            );
            self.pump();
            quit
        }

        fn keys(&mut self, codes: &[KeyCode]) {
            for code in codes {
                self.press(KeyEvent::new(*code, KeyModifiers::NONE));
            }
        }

        fn type_text(&mut self, text: &str) {
            for ch in text.chars() {
                self.press(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::NONE));
            }
        }

        fn value(&self, id: i64, field: &str) -> Option<&str> {
            self.table
                .record(&RecordId::from(id))
                .and_then(|record| record.value(field))
        }

        fn editable(&self, id: i64) -> bool {
            self.table
                .record(&RecordId::from(id))
                .is_some_and(Record::is_editable)
        }
    }

    #[test]
    fn startup_load_fills_table() {
        let harness = Harness::names();
        assert_eq!(harness.runtime.load_calls, 1);
        assert_eq!(harness.table.records().len(), 2);
        assert!(!harness.table.loading());
        assert_eq!(
            harness.view_data.status_line.as_deref(),
            Some("loaded 2 records")
        );
    }

    #[test]
    fn startup_load_failure_shows_error() {
        let runtime = TestRuntime {
            load_error: Some("cannot reach http://127.0.0.1:1/records".to_owned()),
            ..TestRuntime::default()
        };
        let harness = Harness::new(name_table_config(), runtime);

        assert!(harness.table.records().is_empty());
        assert!(!harness.table.loading());
        assert!(harness.table.load_error().is_some());
        let notice = harness.table.notification().expect("error notice");
        assert_eq!(notice.kind, NoticeKind::Error);
        assert!(notice.message.contains("127.0.0.1:1"));
    }

    #[test]
    fn slash_search_filters_rows() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('/')]);
        assert_eq!(harness.view_data.mode, InputMode::Search);

        harness.type_text("a");
        harness.keys(&[KeyCode::Enter]);
        assert_eq!(harness.view_data.mode, InputMode::Nav);
        assert_eq!(harness.table.keyword(), "a");
        assert_eq!(harness.table.visible_records().len(), 1);

        harness.keys(&[KeyCode::Esc]);
        assert_eq!(harness.table.keyword(), "");
        assert_eq!(harness.table.visible_records().len(), 2);
    }

    #[test]
    fn search_typing_q_does_not_quit() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('/')]);
        let quit = harness.press(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(!quit);
        assert_eq!(harness.table.keyword(), "q");
    }

    #[test]
    fn edit_save_confirm_writes_snapshot() {
        let mut harness = Harness::names();

        harness.keys(&[KeyCode::Char('j'), KeyCode::Char('e')]);
        assert!(harness.editable(2));
        assert!(matches!(harness.view_data.mode, InputMode::Edit { .. }));

        harness.type_text("2");
        assert_eq!(harness.value(2, "name"), Some("B2"));

        harness.keys(&[KeyCode::Enter]);
        assert!(harness.table.confirmation().is_some());
        assert!(harness.runtime.submitted.is_empty());

        harness.keys(&[KeyCode::Char('y')]);
        assert_eq!(harness.runtime.submitted.len(), 1);
        let write = &harness.runtime.submitted[0];
        assert_eq!(write.id, RecordId::from(2));
        assert_eq!(write.value("name"), Some("B2"));

        assert!(!harness.editable(2));
        assert_eq!(harness.view_data.mode, InputMode::Nav);
        let record = harness.table.record(&RecordId::from(2)).expect("record 2");
        assert_eq!(record.original_value("name"), Some("B2"));
        assert_eq!(
            harness.table.notification().map(|notice| notice.kind),
            Some(NoticeKind::Success)
        );
    }

    #[test]
    fn failed_write_keeps_row_editable_and_e_resumes() {
        let runtime = TestRuntime {
            records: two_records(),
            update_error: Some("server error (500)".to_owned()),
            ..TestRuntime::default()
        };
        let mut harness = Harness::new(name_table_config(), runtime);

        harness.keys(&[KeyCode::Char('j'), KeyCode::Char('e')]);
        harness.type_text("2");
        harness.keys(&[KeyCode::Enter, KeyCode::Enter]);

        assert!(harness.editable(2));
        assert_eq!(harness.value(2, "name"), Some("B2"));
        let notice = harness.table.notification().expect("error notice");
        assert_eq!(notice.kind, NoticeKind::Error);
        assert!(notice.message.contains("server error (500)"));

        harness.keys(&[KeyCode::Char('e')]);
        assert!(matches!(harness.view_data.mode, InputMode::Edit { .. }));
        harness.keys(&[KeyCode::Esc]);
        assert_eq!(harness.value(2, "name"), Some("B"));
        assert!(!harness.editable(2));
    }

    #[test]
    fn esc_in_edit_reverts_without_write() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('e')]);
        harness.type_text("-changed");
        harness.keys(&[KeyCode::Esc]);

        assert_eq!(harness.value(1, "name"), Some("A"));
        assert!(!harness.editable(1));
        assert!(harness.runtime.submitted.is_empty());
        assert_eq!(harness.view_data.mode, InputMode::Nav);
    }

    #[test]
    fn declining_confirmation_reverts() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('e')]);
        harness.type_text("1");
        harness.keys(&[KeyCode::Enter, KeyCode::Char('n')]);

        assert!(harness.table.confirmation().is_none());
        assert_eq!(harness.value(1, "name"), Some("A"));
        assert!(harness.runtime.submitted.is_empty());
    }

    #[test]
    fn overlong_input_is_blocked_and_reported() {
        let config = TableConfig {
            max_field_len: 3,
            ..name_table_config()
        };
        let mut harness = Harness::new(config, TestRuntime::with_records(two_records()));
        harness.keys(&[KeyCode::Char('e')]);
        harness.type_text("bcd");

        assert_eq!(harness.value(1, "name"), Some("Abc"));
        let error = harness.table.validation().expect("validation message");
        assert_eq!(error.to_string(), "name must be 3 characters or fewer");

        harness.keys(&[KeyCode::Backspace]);
        assert_eq!(harness.value(1, "name"), Some("Ab"));
        assert!(harness.table.validation().is_none());
    }

    #[test]
    fn ctrl_u_clears_field_and_tab_cycles() {
        let config = TableConfig {
            columns: vec![
                ColumnSpec::new("id", "ID", 1),
                ColumnSpec::new("name", "Name", 1).editable(),
                ColumnSpec::new("city", "City", 1).editable(),
            ],
            ..TableConfig::default()
        };
        let record = name_record(1, "A").with_field("city", "Kobe");
        let mut harness = Harness::new(config, TestRuntime::with_records(vec![record]));

        harness.keys(&[KeyCode::Char('e'), KeyCode::Tab]);
        harness.press(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL));
        assert_eq!(harness.value(1, "city"), Some(""));
        assert_eq!(harness.value(1, "name"), Some("A"));

        harness.keys(&[KeyCode::BackTab]);
        assert!(matches!(
            harness.view_data.mode,
            InputMode::Edit { field_index: 0, .. }
        ));
    }

    #[test]
    fn reload_is_refused_while_editing() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('e')]);
        harness.view_data.mode = InputMode::Nav;
        harness.keys(&[KeyCode::Char('r')]);

        assert_eq!(harness.runtime.load_calls, 1);
        assert_eq!(
            harness.view_data.status_line.as_deref(),
            Some("finish pending edits and saves first")
        );
    }

    #[test]
    fn reload_fetches_again_when_idle() {
        let mut harness = Harness::names();
        harness.runtime.records.push(name_record(3, "C"));
        harness.keys(&[KeyCode::Char('r')]);

        assert_eq!(harness.runtime.load_calls, 2);
        assert_eq!(harness.table.records().len(), 3);
    }

    #[test]
    fn dismiss_and_expiry_clear_notification() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('e')]);
        harness.type_text("1");
        harness.keys(&[KeyCode::Enter, KeyCode::Char('y')]);
        let token = harness.table.notification().map(|notice| notice.token).expect("token");

        harness
            .tx
            .send(InternalEvent::ExpireNotification { token: token + 1 })
            .expect("send expiry");
        harness.pump();
        assert!(harness.table.notification().is_some());

        harness.keys(&[KeyCode::Char('x')]);
        assert!(harness.table.notification().is_none());
    }

    #[test]
    fn matching_expiry_clears_notification() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('e')]);
        harness.type_text("1");
        harness.keys(&[KeyCode::Enter, KeyCode::Char('y')]);
        let token = harness.table.notification().map(|notice| notice.token).expect("token");

        harness
            .tx
            .send(InternalEvent::ExpireNotification { token })
            .expect("send expiry");
        harness.pump();
        assert!(harness.table.notification().is_none());
    }

    fn bulk_config() -> TableConfig {
        TableConfig {
            columns: vec![
                ColumnSpec::new("id", "ID", 1),
                ColumnSpec::new("status", "Status", 1),
                ColumnSpec::new("name", "Name", 2).searchable(),
            ],
            write_fields: vec!["status".to_owned()],
            bulk_select: true,
            ..TableConfig::default()
        }
    }

    #[test]
    fn bulk_select_and_write_submits_each_row() {
        let records = vec![
            name_record(1, "A").with_field("status", "新規"),
            name_record(2, "B").with_field("status", "変更"),
        ];
        let mut harness = Harness::new(bulk_config(), TestRuntime::with_records(records));

        harness.keys(&[
            KeyCode::Char(' '),
            KeyCode::Char('j'),
            KeyCode::Char(' '),
            KeyCode::Char('w'),
        ]);
        let Some(confirmation) = harness.table.confirmation() else {
            panic!("bulk confirmation expected");
        };
        let text = confirmation_text(&confirmation);
        assert!(text.starts_with("write 2 records?"));
        assert!(text.contains("id 1: status=新規"));

        harness.keys(&[KeyCode::Char('y')]);
        assert_eq!(harness.runtime.submitted.len(), 2);
        assert!(harness.table.selection().is_empty());
    }

    #[test]
    fn edit_key_explains_read_only_tables() {
        let mut harness = Harness::new(
            bulk_config(),
            TestRuntime::with_records(vec![name_record(1, "A")]),
        );
        harness.keys(&[KeyCode::Char('e')]);
        assert_eq!(
            harness.view_data.status_line.as_deref(),
            Some("no editable columns in this table")
        );
        assert_eq!(harness.view_data.mode, InputMode::Nav);
    }

    #[test]
    fn another_row_edit_is_rejected_with_status() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('e')]);
        harness.view_data.mode = InputMode::Nav;
        harness.keys(&[KeyCode::Char('j'), KeyCode::Char('e')]);

        assert!(!harness.editable(2));
        assert_eq!(
            harness.view_data.status_line.as_deref(),
            Some("finish editing 1 first (save or cancel)")
        );
    }

    #[test]
    fn help_toggles_and_hides_status() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('?')]);
        assert!(harness.view_data.help_visible);
        assert_eq!(status_text(&harness.table, &harness.view_data), "");

        harness.keys(&[KeyCode::Char('?')]);
        assert!(!harness.view_data.help_visible);
    }

    #[test]
    fn quit_keys() {
        let mut harness = Harness::names();
        assert!(harness.press(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL)));
        assert!(harness.press(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));

        harness.keys(&[KeyCode::Char('e')]);
        assert!(!harness.press(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert_eq!(harness.value(1, "name"), Some("Aq"));
    }

    #[test]
    fn status_text_shows_mode_and_focused_field() {
        let mut harness = Harness::names();
        assert!(status_text(&harness.table, &harness.view_data).starts_with("NAV | loaded 2"));

        harness.keys(&[KeyCode::Char('e')]);
        let status = status_text(&harness.table, &harness.view_data);
        assert!(status.starts_with("EDIT | name | "));
    }

    #[test]
    fn confirmation_text_lists_snapshot_values() {
        let mut harness = Harness::names();
        harness.keys(&[KeyCode::Char('e')]);
        harness.type_text("9");
        harness.keys(&[KeyCode::Enter]);

        let confirmation = harness.table.confirmation().expect("confirmation");
        let text = confirmation_text(&confirmation);
        assert!(text.starts_with("save id = 1?"));
        assert!(text.contains("  name: A9"));
    }

    #[test]
    fn titles_and_labels_track_row_state() {
        let mut harness = Harness::names();
        assert_eq!(table_title(&harness.table), "2 records");

        harness.keys(&[KeyCode::Char('/')]);
        harness.type_text("b");
        assert_eq!(table_title(&harness.table), "1/2 records");

        let record = harness.table.record(&RecordId::from(1)).expect("record 1");
        assert_eq!(action_label(&harness.table, record), "e edit");
        assert_eq!(record.state().phase(), RowPhase::View);
    }

    #[test]
    fn new_status_rows_are_green() {
        let fresh = Record::new(RecordId::from(1), BTreeMap::new()).with_field("status", "新規");
        let changed = Record::new(RecordId::from(2), BTreeMap::new()).with_field("status", "変更");
        let plain = Record::new(RecordId::from(3), BTreeMap::new());
        assert_eq!(status_style(&fresh).fg, Some(Color::Green));
        assert_eq!(status_style(&changed).fg, Some(Color::Blue));
        assert_eq!(status_style(&plain).fg, None);
    }

    #[test]
    fn error_notifications_ask_for_dismissal() {
        let runtime = TestRuntime {
            load_error: Some("boom".to_owned()),
            ..TestRuntime::default()
        };
        let harness = Harness::new(name_table_config(), runtime);
        let notice = harness.table.notification().expect("notice");
        let text = notification_text(notice);
        assert!(text.contains("error: load failed: boom"));
        assert!(text.ends_with("(x to dismiss)"));
    }

    #[test]
    fn keys_during_reload_cannot_start_a_save() {
        let mut harness = Harness::names();
        super::dispatch(
            &mut harness.table,
            &mut harness.runtime,
            &mut harness.view_data,
            &harness.tx,
            TableCommand::BeginLoad,
        );
        assert!(harness.table.loading());

        for code in [
            KeyCode::Char('e'),
            KeyCode::Char('Z'),
            KeyCode::Enter,
            KeyCode::Char('y'),
        ] {
            handle_key_event(
                &mut harness.table,
                &mut harness.runtime,
                &mut harness.view_data,
                &harness.tx,
                KeyEvent::new(code, KeyModifiers::NONE),
            );
        }
        assert_eq!(harness.view_data.mode, InputMode::Nav);
        assert_eq!(
            harness.view_data.status_line.as_deref(),
            Some("records are still loading")
        );

        harness.pump();
        assert!(!harness.table.loading());
        assert!(harness.runtime.submitted.is_empty());
        assert_eq!(harness.value(1, "name"), Some("A"));
        assert!(!harness.editable(1));
    }
}
