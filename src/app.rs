use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::sync::Arc;

use crate::actions::{Action, ResumeCommand};
use crate::snapshot::{DashboardSnapshot, SnapshotEntry};
use crate::status::SessionStatus;
use crate::tasks::{TaskGroup, TaskStatus};

/// Theme colors
pub struct Theme {
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87),
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
            info: Color::Rgb(97, 175, 239),
        }
    }
}

impl Theme {
    fn status_color(&self, status: SessionStatus) -> Color {
        match status {
            SessionStatus::Active => self.success,
            SessionStatus::StuckPermission => self.accent,
            SessionStatus::StuckError => self.error,
            SessionStatus::StuckTimeout => self.warning,
            SessionStatus::Completed => self.info,
            SessionStatus::Idle => self.dim,
        }
    }
}

fn status_icon(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "● ",
        SessionStatus::StuckPermission => "? ",
        SessionStatus::StuckError => "✗ ",
        SessionStatus::StuckTimeout => "! ",
        SessionStatus::Completed => "✓ ",
        SessionStatus::Idle => "○ ",
    }
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Searching,
}

/// Which statuses the list shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Stuck,
    Active,
    Completed,
    Idle,
}

impl StatusFilter {
    pub fn next(self) -> Self {
        match self {
            StatusFilter::All => StatusFilter::Stuck,
            StatusFilter::Stuck => StatusFilter::Active,
            StatusFilter::Active => StatusFilter::Completed,
            StatusFilter::Completed => StatusFilter::Idle,
            StatusFilter::Idle => StatusFilter::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Stuck => "stuck",
            StatusFilter::Active => "active",
            StatusFilter::Completed => "completed",
            StatusFilter::Idle => "idle",
        }
    }

    pub fn matches(self, status: SessionStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Stuck => status.is_stuck(),
            StatusFilter::Active => status == SessionStatus::Active,
            StatusFilter::Completed => status == SessionStatus::Completed,
            StatusFilter::Idle => status == SessionStatus::Idle,
        }
    }
}

/// Case-insensitive match over project name, branch, summary, first prompt and id
pub fn matches_query(entry: &SnapshotEntry, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    let session = &entry.session;
    [
        entry.project_name.as_str(),
        session.git_branch.as_str(),
        session.summary.as_str(),
        session.first_prompt.as_str(),
        session.session_id.as_str(),
    ]
    .join(" ")
    .to_lowercase()
    .contains(&query)
}

fn visible<'a>(
    snapshot: &'a DashboardSnapshot,
    filter: StatusFilter,
    query: &str,
) -> Vec<&'a SnapshotEntry> {
    snapshot
        .sessions
        .iter()
        .filter(|e| filter.matches(e.analysis.status) && matches_query(e, query))
        .collect()
}

/// Compact age like `42s`, `5m`, `3h`, `2d`
pub fn format_age(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };
    let seconds = (now - timestamp).num_seconds();
    if seconds < 0 {
        return "now".to_string();
    }
    match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 60 * 60 => format!("{}m", s / 60),
        s if s < 24 * 60 * 60 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// Main application state
pub struct App {
    /// Latest published snapshot
    pub snapshot: Arc<DashboardSnapshot>,
    /// Selection within the filtered list
    pub list_state: ListState,
    /// Transient message shown in the footer
    pub message: Option<String>,
    pub theme: Theme,
    pub input_mode: InputMode,
    pub filter: StatusFilter,
    pub query: String,
    /// Command name used to build resume commands
    pub agent_binary: String,
    /// Pending action queue
    pub pending_actions: Vec<Action>,
}

impl App {
    pub fn new(agent_binary: impl Into<String>) -> Self {
        Self {
            snapshot: Arc::new(DashboardSnapshot::default()),
            list_state: ListState::default(),
            message: None,
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            filter: StatusFilter::default(),
            query: String::new(),
            agent_binary: agent_binary.into(),
            pending_actions: Vec::new(),
        }
    }

    /// Sessions passing the current filter and search
    pub fn visible_sessions(&self) -> Vec<&SnapshotEntry> {
        visible(&self.snapshot, self.filter, &self.query)
    }

    pub fn selected_entry(&self) -> Option<&SnapshotEntry> {
        let index = self.list_state.selected()?;
        self.visible_sessions().get(index).copied()
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::SnapshotUpdated(snapshot) => {
                let selected = self.selected_id();
                self.snapshot = snapshot;
                self.reselect(selected.as_deref());
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn selected_id(&self) -> Option<String> {
        self.selected_entry().map(|e| e.session.session_id.clone())
    }

    /// Keep the same session selected if it is still visible, else stay
    /// at the same row.
    fn reselect(&mut self, session_id: Option<&str>) {
        let visible = self.visible_sessions();
        let index = if visible.is_empty() {
            None
        } else {
            session_id
                .and_then(|id| visible.iter().position(|e| e.session.session_id == id))
                .or_else(|| Some(self.list_state.selected().unwrap_or(0).min(visible.len() - 1)))
        };
        self.list_state.select(index);
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if self.message.is_some() && self.input_mode == InputMode::Normal {
            self.message = None;
        }

        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Searching => self.handle_search_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            KeyCode::Char('j') | KeyCode::Down => self.next_session(),
            KeyCode::Char('k') | KeyCode::Up => self.previous_session(),
            KeyCode::Char('f') => {
                let selected = self.selected_id();
                self.filter = self.filter.next();
                self.reselect(selected.as_deref());
            }
            KeyCode::Char('/') => self.input_mode = InputMode::Searching,
            KeyCode::Esc if !self.query.is_empty() => {
                let selected = self.selected_id();
                self.query.clear();
                self.reselect(selected.as_deref());
            }
            KeyCode::Char('r') => {
                self.pending_actions.push(Action::Refresh);
                self.message = Some("Refreshing...".to_string());
            }
            KeyCode::Enter => {
                if let Some(cmd) = self.resume_command() {
                    self.pending_actions.push(Action::ResumeSession(cmd));
                }
            }
            KeyCode::Char('y') => {
                if let Some(cmd) = self.resume_command() {
                    self.pending_actions.push(Action::CopyResumeCommand(cmd));
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_search_key(&mut self, key: KeyEvent) -> Result<bool> {
        let selected = self.selected_id();
        match key.code {
            KeyCode::Enter => self.input_mode = InputMode::Normal,
            KeyCode::Esc => {
                self.query.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Backspace => {
                self.query.pop();
            }
            KeyCode::Char(c) => self.query.push(c),
            _ => {}
        }
        self.reselect(selected.as_deref());
        Ok(false)
    }

    fn resume_command(&mut self) -> Option<ResumeCommand> {
        let entry = self.selected_entry()?;
        let cmd = ResumeCommand::new(
            &self.agent_binary,
            &entry.session.session_id,
            &entry.session.project_path,
        );
        if cmd.is_none() {
            self.message = Some("Session id is not resumable".to_string());
        }
        cmd
    }

    fn next_session(&mut self) {
        let len = self.visible_sessions().len();
        if len == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.list_state.select(Some(i));
    }

    fn previous_session(&mut self) {
        let len = self.visible_sessions().len();
        if len == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(i));
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_main(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let stats = self.snapshot.stats;
        let count = |n: usize, label: &str, color: Color| {
            Span::styled(format!(" {n} {label} "), Style::default().fg(color))
        };
        let updated = match self.snapshot.updated_at {
            Some(t) => format!("│ updated {}", t.with_timezone(&Local).format("%H:%M:%S")),
            None => "│ scanning...".to_string(),
        };

        let header = Paragraph::new(Line::from(vec![
            Span::styled(
                " AgentPulse ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("│ {} sessions ", stats.total),
                Style::default().fg(self.theme.fg),
            ),
            count(stats.stuck, "stuck", self.theme.error),
            count(stats.active, "active", self.theme.success),
            count(stats.completed, "done", self.theme.info),
            count(stats.idle, "idle", self.theme.dim),
            Span::styled(updated, Style::default().fg(self.theme.dim)),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(header, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(45), // Session list
                Constraint::Percentage(55), // Detail pane
            ])
            .split(area);

        self.render_session_list(frame, chunks[0]);
        self.render_detail_pane(frame, chunks[1]);
    }

    fn render_session_list(&mut self, frame: &mut Frame, area: Rect) {
        let now = Utc::now();
        let theme = &self.theme;
        let entries = visible(&self.snapshot, self.filter, &self.query);

        let items: Vec<ListItem> = if entries.is_empty() {
            let hint = if self.snapshot.sessions.is_empty() {
                "  No sessions found."
            } else {
                "  No sessions match the current filter."
            };
            vec![ListItem::new(Line::from(Span::styled(
                hint,
                Style::default().fg(theme.dim),
            )))]
        } else {
            entries
                .iter()
                .map(|entry| {
                    let status = entry.analysis.status;
                    let mut spans = vec![
                        Span::styled(
                            status_icon(status),
                            Style::default().fg(theme.status_color(status)),
                        ),
                        Span::styled(entry.project_name.as_str(), Style::default().fg(theme.fg)),
                    ];
                    if !entry.session.git_branch.is_empty() {
                        spans.push(Span::styled(
                            format!(" ({})", entry.session.git_branch),
                            Style::default().fg(theme.dim),
                        ));
                    }
                    spans.push(Span::styled(
                        format!(
                            " {} {}",
                            status.label(),
                            format_age(entry.analysis.last_timestamp, now)
                        ),
                        Style::default().fg(theme.status_color(status)),
                    ));
                    ListItem::new(Line::from(spans))
                })
                .collect()
        };

        let title = if self.filter == StatusFilter::All {
            " Sessions ".to_string()
        } else {
            format!(" Sessions [{}] ", self.filter.label())
        };
        let list = List::new(items)
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn render_detail_pane(&self, frame: &mut Frame, area: Rect) {
        let content = match self.selected_entry() {
            Some(entry) => self.detail_lines(entry),
            None => vec![Line::from(Span::styled(
                "No session selected",
                Style::default().fg(self.theme.dim),
            ))],
        };

        let detail = Paragraph::new(content)
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title(" Details ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            );
        frame.render_widget(detail, area);
    }

    fn detail_lines<'a>(&self, entry: &'a SnapshotEntry) -> Vec<Line<'a>> {
        let session = &entry.session;
        let analysis = &entry.analysis;
        let label = |name: &'static str| Span::styled(name, Style::default().fg(self.theme.dim));
        let value = |text: String| Span::styled(text, Style::default().fg(self.theme.fg));
        let status_color = self.theme.status_color(analysis.status);

        let mut lines = vec![
            Line::from(vec![label("Project: "), value(entry.project_name.clone())]),
            Line::from(vec![label("Path:    "), value(session.project_path.clone())]),
        ];
        if !session.git_branch.is_empty() {
            lines.push(Line::from(vec![
                label("Branch:  "),
                value(session.git_branch.clone()),
            ]));
        }
        lines.push(Line::from(vec![label("Session: "), value(session.session_id.clone())]));
        lines.push(Line::from(vec![
            label("Status:  "),
            Span::styled(
                analysis.status.label(),
                Style::default()
                    .fg(status_color)
                    .add_modifier(Modifier::BOLD),
            ),
            label("  last activity "),
            value(format_age(analysis.last_timestamp, Utc::now())),
        ]));

        if let Some(detail) = &analysis.detail {
            if let Some(tool) = &detail.waiting_tool {
                lines.push(Line::from(""));
                lines.push(Line::from(vec![
                    label("Waiting on tool: "),
                    Span::styled(tool.as_str(), Style::default().fg(self.theme.accent)),
                ]));
                if let Some(input) = &detail.waiting_tool_input {
                    lines.push(Line::from(vec![label("  "), value(input.clone())]));
                }
            }
            if let Some(error) = &detail.error_message {
                lines.push(Line::from(""));
                lines.push(Line::from(vec![
                    label("Error: "),
                    Span::styled(error.as_str(), Style::default().fg(self.theme.error)),
                ]));
            }
        }

        let headline = [&session.summary, &session.first_prompt]
            .into_iter()
            .find(|s| !s.is_empty());
        if let Some(headline) = headline {
            lines.push(Line::from(""));
            lines.push(Line::from(label("Summary")));
            lines.push(Line::from(value(headline.clone())));
        }
        if let Some(message) = &analysis.last_message {
            lines.push(Line::from(""));
            lines.push(Line::from(label("Last message")));
            lines.push(Line::from(value(message.clone())));
        }

        if let Some(tasks) = &entry.tasks {
            lines.push(Line::from(""));
            lines.extend(self.task_lines(tasks));
        }

        lines.push(Line::from(""));
        lines.push(Line::from(label("Enter: resume here │ y: copy resume command")));
        lines
    }

    fn task_lines<'a>(&self, group: &'a TaskGroup) -> Vec<Line<'a>> {
        let stats = group.stats;
        let mut lines = vec![Line::from(vec![
            Span::styled("Tasks: ", Style::default().fg(self.theme.dim)),
            Span::styled(
                format!(
                    "{}/{} done, {} in progress",
                    stats.completed, stats.total, stats.in_progress
                ),
                Style::default().fg(self.theme.fg),
            ),
        ])];

        for task in &group.tasks {
            let (mark, color, text) = match task.status {
                TaskStatus::Completed => ("  ✓ ", self.theme.success, &task.subject),
                TaskStatus::InProgress => (
                    "  ▸ ",
                    self.theme.warning,
                    task.active_form.as_ref().unwrap_or(&task.subject),
                ),
                TaskStatus::Pending | TaskStatus::Unknown => ("  ○ ", self.theme.dim, &task.subject),
            };
            lines.push(Line::from(vec![
                Span::styled(mark, Style::default().fg(color)),
                Span::styled(text.as_str(), Style::default().fg(self.theme.fg)),
            ]));
        }
        lines
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let content = if self.input_mode == InputMode::Searching {
            Line::from(vec![
                Span::styled(" / ", Style::default().fg(self.theme.accent)),
                Span::styled(
                    format!("{}_", self.query),
                    Style::default()
                        .fg(self.theme.fg)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    "   Enter: keep │ Esc: clear",
                    Style::default().fg(self.theme.dim),
                ),
            ])
        } else if let Some(ref msg) = self.message {
            Line::from(Span::styled(
                format!(" {} ", msg),
                Style::default().fg(self.theme.warning),
            ))
        } else {
            let mut spans = vec![Span::styled(
                " q: Quit │ j/k: Navigate │ f: Filter │ /: Search │ r: Refresh │ Enter: Resume │ y: Copy command ",
                Style::default().fg(self.theme.dim),
            )];
            if !self.query.is_empty() {
                spans.push(Span::styled(
                    format!("│ search: {} ", self.query),
                    Style::default().fg(self.theme.accent),
                ));
            }
            Line::from(spans)
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }
}
