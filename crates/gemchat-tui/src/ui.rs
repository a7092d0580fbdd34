use gemchat_core::{ChatRole, ReplyService};
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::app::App;

pub const TITLE: &str = "Gemini-Pro Chatbot";
const INPUT_PLACEHOLDER: &str = "How can I help?";

/// Render one line of a reply, turning `**bold**` runs into bold spans.
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("**") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("**") else {
            break;
        };
        if end == 0 {
            // "****" has nothing to embolden
            spans.push(Span::raw(rest[..start + 4].to_string()));
            rest = &after[2..];
            continue;
        }
        if start > 0 {
            spans.push(Span::raw(rest[..start].to_string()));
        }
        spans.push(Span::styled(
            after[..end].to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        rest = &after[end + 2..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn role_header(role: ChatRole) -> Line<'static> {
    let (name, color) = match role {
        ChatRole::User => ("You", Color::Cyan),
        ChatRole::Assistant => ("Gemini", Color::Yellow),
    };
    Line::from(Span::styled(
        format!("{} {}", role.avatar(), name),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ))
}

pub fn render<S: ReplyService + 'static>(app: &mut App<S>, frame: &mut Frame) {
    let area = frame.area();

    let [chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_chat<S: ReplyService + 'static>(app: &App<S>, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(format!(" {} ", TITLE))
        .title_alignment(Alignment::Center)
        .title_bottom(Line::from(format!(" {} ", app.model)).right_aligned());

    let text = if app.turns.is_empty() && !app.is_loading() {
        Text::from(Span::styled(
            "No messages yet. Say hello!",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for turn in &app.turns {
            lines.push(role_header(turn.role));
            match turn.role {
                ChatRole::User => {
                    for line in turn.content.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                ChatRole::Assistant => {
                    for line in turn.content.lines() {
                        lines.push(parse_markdown_line(line));
                    }
                }
            }
            lines.push(Line::default());
        }

        if app.is_loading() {
            lines.push(role_header(ChatRole::Assistant));
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input<S: ReplyService + 'static>(app: &App<S>, frame: &mut Frame, area: Rect) {
    let border_color = if app.is_loading() {
        Color::DarkGray
    } else {
        Color::Yellow
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Message ");

    // Horizontal scrolling keeps the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 || app.cursor < inner_width {
        0
    } else {
        app.cursor - inner_width + 1
    };

    let input = if app.input.is_empty() {
        Paragraph::new(Span::styled(
            INPUT_PLACEHOLDER,
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let visible: String = app
            .input
            .chars()
            .skip(scroll_offset)
            .take(inner_width)
            .collect();
        Paragraph::new(visible).style(Style::default().fg(Color::Cyan))
    };

    frame.render_widget(input.block(block), area);

    if !app.is_loading() {
        let cursor_x = (app.cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer<S: ReplyService + 'static>(app: &App<S>, frame: &mut Frame, area: Rect) {
    let line = match &app.status {
        Some(status) if status.is_error => Line::from(Span::styled(
            status.message.clone(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Some(status) => Line::from(Span::styled(
            status.message.clone(),
            Style::default().fg(Color::Green),
        )),
        None => Line::from(Span::styled(
            "Enter send · ↑/↓ scroll · Ctrl+D delete chat history · Esc quit",
            Style::default().fg(Color::DarkGray),
        )),
    };

    frame.render_widget(Paragraph::new(line), area);
}
