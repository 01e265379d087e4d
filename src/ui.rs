use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::{io, time::Duration};
use textwrap::wrap;
use tui_input::{backend::crossterm::EventHandler, Input};

use chatterline::{ChatState, Contact, ContactListView, MessagePayload, Notification, NotificationLevel, OnlineSet};

// Export types needed by main module
pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

/// Seconds a toast stays on screen
pub const TOAST_TTL_SECS: i64 = 4;

/// What the main loop should do after a key press
pub enum UiAction {
    Quit,
    Select(Contact),
    Send(MessagePayload),
}

enum Focus {
    Contacts,
    Messages,
}

pub struct ChatUI {
    input: Input,
    view: ContactListView,
    focus: Focus,
    cursor: Option<String>, // Contact id under the cursor; rows reorder, indexes don't survive
    toasts: Vec<Notification>,
    own_id: String,
    connection_status: bool,
}

impl ChatUI {
    pub fn new(own_id: &str) -> Self {
        ChatUI {
            input: Input::default(),
            view: ContactListView::new(),
            focus: Focus::Contacts,
            cursor: None,
            toasts: Vec::new(),
            own_id: own_id.to_string(),
            connection_status: false,
        }
    }

    pub fn push_notification(&mut self, notification: Notification) {
        debug!("UI: Showing notification: {}", notification.text);
        self.toasts.push(notification);
    }

    // Drop toasts that have been visible for long enough
    pub fn clean_notifications(&mut self, ttl_secs: i64) {
        let now = chrono::Utc::now();
        self.toasts.retain(|t| !t.is_expired(now, ttl_secs));
    }

    pub fn set_connection_status(&mut self, connected: bool) {
        self.connection_status = connected;
    }

    fn cursor_index(&self, ids: &[&str]) -> usize {
        self.cursor
            .as_deref()
            .and_then(|id| ids.iter().position(|candidate| *candidate == id))
            .unwrap_or(0)
    }

    fn move_cursor(&mut self, ids: &[&str], forward: bool) {
        if ids.is_empty() {
            return;
        }
        let current = self.cursor_index(ids);
        let next = if forward {
            (current + 1) % ids.len()
        } else {
            (current + ids.len() - 1) % ids.len()
        };
        self.cursor = Some(ids[next].to_string());
    }

    pub fn handle_input(&mut self, state: &ChatState, online: &OnlineSet) -> Result<Option<UiAction>> {
        if !event::poll(Duration::from_millis(10))? {
            return Ok(None);
        }
        let Event::Key(key) = event::read()? else {
            return Ok(None);
        };
        if key.kind != KeyEventKind::Press {
            return Ok(None);
        }

        let rows = self.view.rows(state, online);
        let ids: Vec<&str> = rows.iter().map(|r| r.contact.id.as_str()).collect();

        match key.code {
            KeyCode::Esc => return Ok(Some(UiAction::Quit)),
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Contacts => Focus::Messages,
                    Focus::Messages => Focus::Contacts,
                };
            }
            KeyCode::Char('o') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.view.toggle_online_only();
            }
            KeyCode::Up if matches!(self.focus, Focus::Contacts) => self.move_cursor(&ids, false),
            KeyCode::Down if matches!(self.focus, Focus::Contacts) => self.move_cursor(&ids, true),
            KeyCode::Enter => match self.focus {
                Focus::Contacts => {
                    if let Some(row) = rows.get(self.cursor_index(&ids)) {
                        let contact = row.contact.clone();
                        self.cursor = Some(contact.id.clone());
                        self.focus = Focus::Messages;
                        return Ok(Some(UiAction::Select(contact)));
                    }
                }
                Focus::Messages => {
                    let text = self.input.value().trim().to_string();
                    if !text.is_empty() {
                        self.input = Input::default();
                        return Ok(Some(UiAction::Send(MessagePayload::text(text))));
                    }
                }
            },
            _ => {
                if let Focus::Messages = self.focus {
                    self.input.handle_event(&Event::Key(key));
                }
            }
        }
        Ok(None)
    }

    pub fn draw<B: Backend>(&self, frame: &mut Frame<B>, state: &ChatState, online: &OnlineSet) {
        let size = frame.size();

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(25), // Contacts panel
                Constraint::Percentage(75), // Chat panel
            ])
            .split(size);

        let chat_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // Messages area
                Constraint::Length(3), // Input box
                Constraint::Length(1), // Help line
            ])
            .split(chunks[1]);

        self.draw_contacts(frame, chunks[0], state, online);
        draw_messages(frame, chat_chunks[0], state, &self.own_id, self.connection_status);

        let input_block = Block::default()
            .title("Message")
            .borders(Borders::ALL)
            .border_style(match self.focus {
                Focus::Messages => Style::default().fg(Color::Yellow),
                Focus::Contacts => Style::default(),
            });
        let input_widget = Paragraph::new(self.input.value()).block(input_block);
        frame.render_widget(input_widget, chat_chunks[1]);

        let filter_state = if self.view.show_online_only() { "on" } else { "off" };
        let help = Paragraph::new(Line::from(vec![
            Span::styled("ESC quit | TAB switch | ↑↓ move | ENTER select/send | Ctrl+O online only [", Style::default().fg(Color::Gray)),
            Span::styled(filter_state, Style::default().fg(Color::Cyan)),
            Span::styled("]", Style::default().fg(Color::Gray)),
        ]));
        frame.render_widget(help, chat_chunks[2]);

        if let Focus::Messages = self.focus {
            frame.set_cursor(
                chat_chunks[1].x + self.input.cursor() as u16 + 1,
                chat_chunks[1].y + 1,
            );
        }

        if !self.toasts.is_empty() {
            draw_toasts(frame, &self.toasts, size);
        }
    }

    fn draw_contacts<B: Backend>(&self, frame: &mut Frame<B>, area: Rect, state: &ChatState, online: &OnlineSet) {
        let online_count = ContactListView::online_count(online, Some(&self.own_id));
        let title = match state.unread_counts.total() {
            0 => format!("Contacts ({} online)", online_count),
            unread => format!("Contacts ({} online, {} unread)", online_count, unread),
        };
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(match self.focus {
                Focus::Contacts => Style::default().fg(Color::Yellow),
                Focus::Messages => Style::default(),
            });

        if state.is_users_loading {
            let loading = Paragraph::new("Loading contacts...")
                .style(Style::default().fg(Color::Gray))
                .block(block);
            frame.render_widget(loading, area);
            return;
        }

        let rows = self.view.rows(state, online);
        if rows.is_empty() {
            let empty = Paragraph::new("No online users")
                .alignment(Alignment::Center)
                .style(Style::default().fg(Color::DarkGray))
                .block(block);
            frame.render_widget(empty, area);
            return;
        }

        let ids: Vec<&str> = rows.iter().map(|r| r.contact.id.as_str()).collect();
        let cursor = self.cursor_index(&ids);

        let items: Vec<ListItem> = rows
            .iter()
            .map(|row| {
                let (dot, dot_style, status) = if row.online {
                    ("● ", Style::default().fg(Color::Green), "Online")
                } else {
                    ("○ ", Style::default().fg(Color::DarkGray), "Offline")
                };
                let mut name_line = vec![
                    Span::styled(dot, dot_style),
                    Span::styled(row.contact.full_name.clone(), Style::default().add_modifier(Modifier::BOLD)),
                ];
                if let Some(unread) = row.unread {
                    name_line.push(Span::styled(
                        format!(" ({})", unread),
                        Style::default().fg(Color::Black).bg(Color::Magenta),
                    ));
                }
                let style = if row.selected {
                    Style::default().bg(Color::DarkGray)
                } else {
                    Style::default()
                };
                ListItem::new(vec![
                    Line::from(name_line),
                    Line::from(Span::styled(format!("  {}", status), Style::default().fg(Color::Gray))),
                ])
                .style(style)
            })
            .collect();

        let mut list_state = ListState::default();
        list_state.select(Some(cursor));
        let list = List::new(items)
            .block(block)
            .highlight_symbol("> ");
        frame.render_stateful_widget(list, area, &mut list_state);
    }
}

fn draw_messages<B: Backend>(f: &mut Frame<B>, area: Rect, state: &ChatState, own_id: &str, connected: bool) {
    let wrap_width = area.width.saturating_sub(2) as usize; // Account for borders
    let connection_icon = if connected { "● " } else { "○ " };

    let Some(selected) = &state.selected_user else {
        let hint = Paragraph::new("Select a contact to start chatting")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::ALL).title(format!("{}Messages", connection_icon)));
        f.render_widget(hint, area);
        return;
    };

    let title = format!("{}{} [{}]", connection_icon, selected.full_name, selected.avatar());

    if state.is_messages_loading {
        let loading = Paragraph::new("Loading messages...")
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(loading, area);
        return;
    }

    let items: Vec<ListItem> = state
        .messages
        .iter()
        .flat_map(|m| {
            let timestamp = m
                .created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string();
            let outgoing = m.sender_id == own_id;
            let sender = if outgoing { "You" } else { selected.full_name.as_str() };

            let mut body = m.text.clone().unwrap_or_default();
            if let Some(image) = &m.image {
                if !body.is_empty() {
                    body.push(' ');
                }
                body.push_str(&format!("[image: {}]", image));
            }

            let full_content = format!("[{}] {}: {}", timestamp, sender, body);
            let wrapped_lines: Vec<String> = wrap(&full_content, wrap_width.max(1))
                .into_iter()
                .map(|l| l.into_owned())
                .collect();

            let style = if outgoing {
                Style::default().fg(Color::Blue)
            } else {
                Style::default()
            };
            wrapped_lines
                .into_iter()
                .map(move |line| ListItem::new(Text::from(line)).style(style))
        })
        .collect();

    // Keep the newest message in view
    let mut list_state = ListState::default();
    if !items.is_empty() {
        list_state.select(Some(items.len() - 1));
    }

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default());
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_toasts<B: Backend>(f: &mut Frame<B>, toasts: &[Notification], area: Rect) {
    let popup_width = 44.min(area.width.saturating_sub(4));
    let popup_height = (toasts.len() as u16 + 2).min(area.height.saturating_sub(4));
    if popup_width == 0 || popup_height < 3 {
        return;
    }

    let popup_area = Rect::new(area.width - popup_width - 2, 1, popup_width, popup_height);
    let border_color = if toasts.iter().any(|t| t.level == NotificationLevel::Error) {
        Color::Red
    } else {
        Color::Green
    };

    let items: Vec<ListItem> = toasts
        .iter()
        .map(|t| {
            let color = match t.level {
                NotificationLevel::Error => Color::Red,
                NotificationLevel::Info => Color::Green,
            };
            ListItem::new(t.text.as_str()).style(Style::default().fg(color))
        })
        .collect();

    f.render_widget(Clear, popup_area); // Clear the area first
    let list = List::new(items).block(
        Block::default()
            .title("Notifications")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border_color)),
    );
    f.render_widget(list, popup_area);
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
