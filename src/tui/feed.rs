#![forbid(unsafe_code)]

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, Wrap};
use time::OffsetDateTime;

use crate::output::table::{format_date, truncate};
use crate::task::history::TaskHistory;
use crate::task::model::{Task, TaskStatus};

pub fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Analyzing => Color::Blue,
        TaskStatus::Searching => Color::Yellow,
        TaskStatus::Booking => Color::Magenta,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Error => Color::Red,
    }
}

pub fn status_icon(status: TaskStatus, icons: bool) -> &'static str {
    if icons {
        match status {
            TaskStatus::Analyzing => "◐",
            TaskStatus::Searching => "⌕",
            TaskStatus::Booking => "✎",
            TaskStatus::Completed => "✔",
            TaskStatus::Error => "✖",
        }
    } else {
        match status {
            TaskStatus::Analyzing => "[~]",
            TaskStatus::Searching => "[?]",
            TaskStatus::Booking => "[*]",
            TaskStatus::Completed => "[+]",
            TaskStatus::Error => "[!]",
        }
    }
}

pub fn format_time(ts: OffsetDateTime) -> String {
    format!("{:02}:{:02}:{:02}", ts.hour(), ts.minute(), ts.second())
}

/// Height the status feed needs for `task`.
pub fn feed_height(task: &Task) -> u16 {
    // borders + status line + message + gauge
    let mut h = 2 + 1 + 1 + 1;
    if task.result.is_some() {
        h += 3;
    }
    if task.is_terminal() {
        h += 1;
    }
    h
}

pub fn draw_status_feed(f: &mut Frame<'_>, area: Rect, task: &Task, icons: bool) {
    let color = status_color(task.status);
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut constraints = vec![
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
    ];
    if task.result.is_some() {
        constraints.push(Constraint::Length(3));
    }
    if task.is_terminal() {
        constraints.push(Constraint::Length(1));
    }
    constraints.push(Constraint::Min(0));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(inner);

    let header = Line::from(vec![
        Span::styled(
            format!("{} ", status_icon(task.status, icons)),
            Style::default().fg(color),
        ),
        Span::styled(
            task.status.label(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(
            format_time(task.timestamp),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    f.render_widget(Paragraph::new(header), chunks[0]);
    f.render_widget(
        Paragraph::new(task.message.as_str()).wrap(Wrap { trim: true }),
        chunks[1],
    );

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(color))
        .percent(task.status.progress_percent());
    f.render_widget(gauge, chunks[2]);

    let mut next = 3;
    if let Some(result) = &task.result {
        let p = Paragraph::new(result.as_str())
            .block(Block::default().title(" Result ").borders(Borders::ALL))
            .style(Style::default().fg(Color::Green))
            .wrap(Wrap { trim: true });
        f.render_widget(p, chunks[next]);
        next += 1;
    }
    if task.is_terminal() {
        let hint = Line::from(vec![
            Span::styled("Ctrl+N", Style::default().add_modifier(Modifier::BOLD)),
            Span::styled(" start new task", Style::default().fg(Color::DarkGray)),
        ]);
        f.render_widget(Paragraph::new(hint), chunks[next]);
    }
}

pub fn draw_history(f: &mut Frame<'_>, area: Rect, history: &TaskHistory, icons: bool) {
    let block = Block::default().title(" Recent tasks ").borders(Borders::ALL);
    if history.is_empty() {
        let p = Paragraph::new(Span::styled(
            "No recent tasks",
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        f.render_widget(p, area);
        return;
    }

    let width = usize::from(area.width.saturating_sub(30) / 2).max(10);
    let rows = history.iter().map(|task| {
        let color = status_color(task.status);
        Row::new(vec![
            Cell::from(format!(
                "{} {}",
                status_icon(task.status, icons),
                task.status.badge()
            ))
            .style(Style::default().fg(color)),
            Cell::from(truncate(&task.description, width)),
            Cell::from(
                task.result
                    .as_deref()
                    .map_or_else(String::new, |r| truncate(r, width)),
            ),
            Cell::from(format_date(task)).style(Style::default().fg(Color::DarkGray)),
        ])
    });
    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Percentage(50),
            Constraint::Percentage(50),
            Constraint::Length(10),
        ],
    )
    .header(
        Row::new(vec!["STATUS", "TASK", "RESULT", "DATE"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(block);
    f.render_widget(table, area);
}
