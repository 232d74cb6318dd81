#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use crate::config::Config;
use crate::task::intake::TaskIntake;
use crate::task::orchestrator::Orchestrator;
use crate::tui::{self, feed};

/// Multi-line text buffer with a char-indexed cursor.
#[derive(Debug, Clone, Default)]
struct TextInput {
    text: String,
    cursor: usize,
}

impl TextInput {
    fn new(initial: impl Into<String>) -> Self {
        let text = initial.into();
        let cursor = text.chars().count();
        Self { text, cursor }
    }

    fn as_str(&self) -> &str {
        &self.text
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn insert_char(&mut self, c: char) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let cur = self.cursor.min(chars.len());
        chars.insert(cur, c);
        self.text = chars.into_iter().collect();
        self.cursor = cur + 1;
    }

    fn backspace(&mut self) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let cur = self.cursor.min(chars.len());
        if cur == 0 {
            return;
        }
        chars.remove(cur - 1);
        self.text = chars.into_iter().collect();
        self.cursor = cur - 1;
    }

    fn delete(&mut self) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let cur = self.cursor.min(chars.len());
        if cur >= chars.len() {
            return;
        }
        chars.remove(cur);
        self.text = chars.into_iter().collect();
    }

    fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn move_right(&mut self) {
        let len = self.text.chars().count();
        self.cursor = (self.cursor + 1).min(len);
    }

    fn move_home(&mut self) {
        let (row, _) = self.cursor_row_col();
        self.cursor = self.line_start(row);
    }

    fn move_end(&mut self) {
        let (row, _) = self.cursor_row_col();
        self.cursor = self.line_start(row) + self.line_len(row);
    }

    fn move_up(&mut self) {
        let (row, col) = self.cursor_row_col();
        if row > 0 {
            self.cursor = self.line_start(row - 1) + col.min(self.line_len(row - 1));
        }
    }

    fn move_down(&mut self) {
        let (row, col) = self.cursor_row_col();
        if row + 1 < self.line_count() {
            self.cursor = self.line_start(row + 1) + col.min(self.line_len(row + 1));
        }
    }

    fn line_count(&self) -> usize {
        self.text.split('\n').count()
    }

    fn line_len(&self, row: usize) -> usize {
        self.text
            .split('\n')
            .nth(row)
            .map_or(0, |l| l.chars().count())
    }

    fn line_start(&self, row: usize) -> usize {
        self.text
            .split('\n')
            .take(row)
            .map(|l| l.chars().count() + 1)
            .sum()
    }

    fn cursor_row_col(&self) -> (usize, usize) {
        let mut row = 0;
        let mut col = 0;
        for c in self.text.chars().take(self.cursor) {
            if c == '\n' {
                row += 1;
                col = 0;
            } else {
                col += 1;
            }
        }
        (row, col)
    }
}

#[derive(Debug, Clone)]
struct Toast {
    message: String,
    until: Instant,
}

impl Toast {
    fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            until: Instant::now() + Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
struct AppState {
    cfg: Config,
    orchestrator: Orchestrator,
    intake: TaskIntake,
    input: TextInput,
    toast: Option<Toast>,
    show_help: bool,
    should_quit: bool,
}

impl AppState {
    fn new(cfg: Config, orchestrator: Orchestrator) -> Self {
        Self {
            cfg,
            orchestrator,
            intake: TaskIntake::new(),
            input: TextInput::default(),
            toast: None,
            show_help: false,
            should_quit: false,
        }
    }

    fn input_disabled(&self) -> bool {
        self.orchestrator.is_processing()
    }

    fn submit(&mut self) {
        match TaskIntake::submit(self.input.as_str(), self.input_disabled()) {
            Ok(Some(req)) => match self.orchestrator.start(req) {
                Ok(_) => self.input = TextInput::default(),
                Err(e) => self.toast = Some(Toast::info(e.to_string())),
            },
            Ok(None) => {}
            Err(e) => self.toast = Some(Toast::info(e.to_string())),
        }
    }

    fn cycle_example(&mut self) {
        if let Some(example) = self.intake.cycle_example(self.input_disabled()) {
            self.input = TextInput::new(example);
        }
    }

    fn start_new(&mut self) {
        if self
            .orchestrator
            .current()
            .is_some_and(crate::task::model::Task::is_terminal)
        {
            self.orchestrator.discard_current();
            self.input = TextInput::default();
        }
    }
}

pub async fn run(cfg: Config, orchestrator: Orchestrator) -> anyhow::Result<()> {
    let terminal = tui::init_terminal()?;
    let mut guard = TerminalGuard::new(terminal);

    let tick = Duration::from_millis(cfg.ui.tick_rate_ms.max(10));
    let mut app = AppState::new(cfg, orchestrator);
    tracing::info!(agent = app.orchestrator.agent_name(), "ui started");

    loop {
        app.orchestrator.poll_events();

        if let Some(toast) = &app.toast
            && Instant::now() >= toast.until
        {
            app.toast = None;
        }

        {
            let Some(terminal) = guard.terminal.as_mut() else {
                anyhow::bail!("terminal unavailable");
            };
            terminal.draw(|f| draw(f, &app))?;
        }

        if app.should_quit {
            break;
        }

        tokio::task::yield_now().await;

        if event::poll(tick)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            handle_key(key, &mut app);
        }
    }

    Ok(())
}

fn is_submit(key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Enter => key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT),
        KeyCode::Char('s') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn handle_key(key: KeyEvent, app: &mut AppState) {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return;
    }
    if app.show_help {
        app.show_help = false;
        return;
    }
    if key.code == KeyCode::F(1) {
        app.show_help = true;
        return;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('n') {
        app.start_new();
        return;
    }
    if is_submit(&key) {
        app.submit();
        return;
    }

    if app.input_disabled() {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('q')) {
            app.should_quit = true;
        }
        return;
    }

    match key.code {
        KeyCode::Esc => {
            if app.input.as_str().is_empty() {
                app.should_quit = true;
            } else {
                app.input = TextInput::default();
            }
        }
        KeyCode::Tab => app.cycle_example(),
        KeyCode::Enter => app.input.insert_char('\n'),
        KeyCode::Backspace => app.input.backspace(),
        KeyCode::Delete => app.input.delete(),
        KeyCode::Left => app.input.move_left(),
        KeyCode::Right => app.input.move_right(),
        KeyCode::Up => app.input.move_up(),
        KeyCode::Down => app.input.move_down(),
        KeyCode::Home => app.input.move_home(),
        KeyCode::End => app.input.move_end(),
        KeyCode::Char(c) => {
            if !key
                .modifiers
                .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
            {
                app.input.insert_char(c);
            }
        }
        _ => {}
    }
}

fn draw(f: &mut Frame<'_>, app: &AppState) {
    let area = f.area();
    let icons = app.cfg.ui.icons;

    let feed_height = app.orchestrator.current().map_or(0, feed::feed_height);
    let history_height = u16::try_from(app.orchestrator.history().len())
        .unwrap_or(0)
        .max(1)
        + 3;

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(feed_height),
            Constraint::Length(history_height),
            Constraint::Length(1),
        ])
        .split(area);

    draw_header(f, root[0], app);
    draw_input(f, root[1], app);
    if let Some(task) = app.orchestrator.current() {
        feed::draw_status_feed(f, root[2], task, icons);
    }
    feed::draw_history(f, root[3], app.orchestrator.history(), icons);
    draw_footer(f, root[4], app);

    if app.show_help {
        draw_help(f);
    }
}

fn draw_header(f: &mut Frame<'_>, area: Rect, app: &AppState) {
    let line = Line::from(vec![
        Span::styled("taskpilot", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(
            format!("agent: {}", app.orchestrator.agent_name()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn draw_input(f: &mut Frame<'_>, area: Rect, app: &AppState) {
    let disabled = app.input_disabled();
    let border = if disabled {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Cyan)
    };
    let block = Block::default()
        .title(" Describe your task ")
        .borders(Borders::ALL)
        .border_style(border);
    let inner = block.inner(area);

    let body = if app.input.as_str().is_empty() && !disabled {
        Paragraph::new(Span::styled(
            "e.g. find a dentist nearby and book the earliest slot (Tab for examples)",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let style = if disabled {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };
        Paragraph::new(app.input.as_str()).style(style)
    };
    f.render_widget(body.block(block).wrap(Wrap { trim: false }), area);

    if !disabled {
        let (row, col) = app.input.cursor_row_col();
        let x = inner.x + u16::try_from(col).unwrap_or(u16::MAX).min(inner.width.saturating_sub(1));
        let y = inner.y + u16::try_from(row).unwrap_or(u16::MAX).min(inner.height.saturating_sub(1));
        f.set_cursor_position((x, y));
    }
}

fn draw_footer(f: &mut Frame<'_>, area: Rect, app: &AppState) {
    let line = if let Some(toast) = &app.toast {
        Line::from(Span::styled(
            toast.message.as_str(),
            Style::default().fg(Color::Red),
        ))
    } else {
        let keys = if app.input_disabled() {
            "working... • q/Esc quit • F1 help"
        } else if app.orchestrator.current().is_some_and(|t| t.is_terminal()) {
            "Ctrl+S submit • Ctrl+N start new • Tab example • Esc quit • F1 help"
        } else {
            "Ctrl+S submit • Enter newline • Tab example • Esc quit • F1 help"
        };
        Line::from(Span::styled(keys, Style::default().fg(Color::DarkGray)))
    };
    f.render_widget(Paragraph::new(line), area);
}

fn draw_help(f: &mut Frame<'_>) {
    let area = centered_rect(60, 50, f.area());
    f.render_widget(Clear, area);
    let lines = vec![
        Line::from("Ctrl+Enter / Alt+Enter / Ctrl+S   submit task"),
        Line::from("Enter                             new line"),
        Line::from("Tab                               fill in an example"),
        Line::from("Ctrl+N                            start new (after a task ends)"),
        Line::from("Esc                               clear input, or quit when empty"),
        Line::from("Ctrl+C                            quit"),
        Line::from(""),
        Line::from(Span::styled(
            "any key to close",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let p = Paragraph::new(lines)
        .block(Block::default().title(" Keys ").borders(Borders::ALL))
        .wrap(Wrap { trim: false });
    f.render_widget(p, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

struct TerminalGuard {
    terminal: Option<tui::Term>,
}

impl TerminalGuard {
    fn new(terminal: tui::Term) -> Self {
        Self {
            terminal: Some(terminal),
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Some(terminal) = self.terminal.take() {
            let _ = tui::restore_terminal(terminal);
        }
    }
}
