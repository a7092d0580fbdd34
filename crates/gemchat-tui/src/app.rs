use anyhow::{anyhow, Context, Result};
use gemchat_core::{ChatError, ChatSession, ChatTurn, ReplyService};
use tokio::task::JoinHandle;

type TurnTask<S> = JoinHandle<(ChatSession<S>, Result<String, ChatError>)>;

/// One-line message shown under the input box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub message: String,
    pub is_error: bool,
}

impl Status {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
        }
    }
}

pub struct App<S: ReplyService + 'static> {
    pub should_quit: bool,
    pub model: String,

    // Conversation as displayed. Mirrors the session history, plus the
    // pending user turn while a reply is in flight.
    pub turns: Vec<ChatTurn>,

    // Input state
    pub input: String,
    pub cursor: usize, // cursor position in chars

    // Chat view state
    pub scroll: u16,
    pub chat_height: u16, // inner height of the chat area, set during render
    pub chat_width: u16,  // inner width of the chat area, set during render
    pub animation_frame: u8, // 0-2 for ellipsis animation
    pub status: Option<Status>,

    // The session is moved into `turn_task` while a turn runs and handed back
    // when it completes, so only one turn is ever in flight.
    session: Option<ChatSession<S>>,
    turn_task: Option<TurnTask<S>>,
}

impl<S: ReplyService + 'static> App<S> {
    pub fn new(session: ChatSession<S>, model: impl Into<String>) -> Self {
        let turns = session.history().to_vec();
        let mut app = Self {
            should_quit: false,
            model: model.into(),
            turns,
            input: String::new(),
            cursor: 0,
            scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
            status: None,
            session: Some(session),
            turn_task: None,
        };
        app.scroll_to_bottom();
        app
    }

    pub fn is_loading(&self) -> bool {
        self.turn_task.is_some()
    }

    /// Send the current input as a new turn. Ignored while a turn is running.
    pub fn submit_input(&mut self) {
        if self.input.trim().is_empty() || self.is_loading() {
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };

        let utterance = std::mem::take(&mut self.input);
        self.turns.push(ChatTurn::user(utterance.clone()));
        self.cursor = 0;
        self.status = None;
        self.animation_frame = 0;

        self.turn_task = Some(tokio::spawn(async move {
            let result = session.submit(&utterance).await;
            (session, result)
        }));

        // Scroll to bottom so "Thinking..." is visible
        self.scroll_to_bottom();
    }

    /// Collect a finished turn, if there is one.
    pub async fn poll_turn(&mut self) -> Result<()> {
        let finished = self
            .turn_task
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(false);
        if !finished {
            return Ok(());
        }

        let task = self
            .turn_task
            .take()
            .ok_or_else(|| anyhow!("turn task disappeared"))?;
        let (session, result) = task.await.context("chat turn task failed")?;

        self.turns = session.history().to_vec();
        self.session = Some(session);

        if let Err(err) = result {
            tracing::warn!(error = %err, "chat turn failed");
            self.status = Some(Status::error(format!("Error: {}", err)));
        }

        self.scroll_to_bottom();
        Ok(())
    }

    /// Wait for the in-flight turn, if any. Turns cannot be cancelled.
    pub async fn wait_for_turn(&mut self) -> Result<()> {
        if let Some(task) = self.turn_task.take() {
            let (session, result) = task.await.context("chat turn task failed")?;
            self.turns = session.history().to_vec();
            self.session = Some(session);
            result?;
        }
        Ok(())
    }

    /// Delete the chat history. Refused while a reply is being generated.
    pub fn clear_history(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.status = Some(Status::error("Wait for the reply before deleting history"));
            return;
        };

        match session.clear() {
            Ok(()) => {
                self.turns.clear();
                self.scroll = 0;
                self.status = Some(Status::info("Chat history deleted"));
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to delete chat history");
                self.status = Some(Status::error(format!("Error: {}", err)));
            }
        }
    }

    pub fn tick_animation(&mut self) {
        if self.is_loading() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_add(lines).min(self.max_scroll());
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
    }

    fn max_scroll(&self) -> u16 {
        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };
        self.total_chat_lines().saturating_sub(visible_height)
    }

    /// Estimated rendered height of the conversation, including wrapping
    fn total_chat_lines(&self) -> u16 {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for turn in &self.turns {
            total_lines = total_lines.saturating_add(1); // avatar + name line
            for line in turn.content.lines() {
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 {
                    1
                } else {
                    char_count.div_ceil(wrap_width)
                };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            total_lines = total_lines.saturating_add(1); // blank line after message
        }

        if self.is_loading() {
            total_lines = total_lines.saturating_add(2); // name + "Thinking..."
        }
        total_lines
    }
}
