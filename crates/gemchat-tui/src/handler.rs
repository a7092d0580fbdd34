use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use gemchat_core::ReplyService;

use crate::app::App;
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event<S: ReplyService + 'static>(app: &mut App<S>, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize => app.scroll_to_bottom(),
        AppEvent::Tick => app.tick_animation(),
    }
    Ok(())
}

fn handle_key<S: ReplyService + 'static>(app: &mut App<S>, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Char('c') if ctrl => app.should_quit = true,
        KeyCode::Char('d') if ctrl => app.clear_history(),
        KeyCode::Esc => app.should_quit = true,

        KeyCode::Enter => app.submit_input(),

        // Chat scrolling
        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),
        KeyCode::PageUp => app.scroll_up(app.chat_height.max(2) / 2),
        KeyCode::PageDown => app.scroll_down(app.chat_height.max(2) / 2),

        // Input editing
        KeyCode::Backspace => {
            if app.cursor > 0 {
                app.cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            if app.cursor < app.input.chars().count() {
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => app.cursor = app.cursor.saturating_sub(1),
        KeyCode::Right => {
            app.cursor = (app.cursor + 1).min(app.input.chars().count());
        }
        KeyCode::Home => app.cursor = 0,
        KeyCode::End => app.cursor = app.input.chars().count(),
        KeyCode::Char('u') if ctrl => {
            app.input.clear();
            app.cursor = 0;
        }
        KeyCode::Char(c) if !ctrl => {
            let byte_pos = char_to_byte_index(&app.input, app.cursor);
            app.input.insert(byte_pos, c);
            app.cursor += 1;
        }
        _ => {}
    }
}

fn handle_mouse<S: ReplyService + 'static>(app: &mut App<S>, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::test_app;
    use tempfile::TempDir;

    fn press(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn ctrl(c: char) -> AppEvent {
        AppEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
    }

    #[test]
    fn test_char_to_byte_index_multibyte() {
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("abc", 10), 3);
    }

    #[tokio::test]
    async fn test_typing_and_editing() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);

        for c in "helo".chars() {
            handle_event(&mut app, press(KeyCode::Char(c))).unwrap();
        }
        handle_event(&mut app, press(KeyCode::Left)).unwrap();
        handle_event(&mut app, press(KeyCode::Char('l'))).unwrap();
        assert_eq!(app.input, "hello");
        assert_eq!(app.cursor, 4);

        handle_event(&mut app, press(KeyCode::End)).unwrap();
        handle_event(&mut app, press(KeyCode::Backspace)).unwrap();
        assert_eq!(app.input, "hell");

        handle_event(&mut app, press(KeyCode::Home)).unwrap();
        handle_event(&mut app, press(KeyCode::Delete)).unwrap();
        assert_eq!(app.input, "ell");
        assert_eq!(app.cursor, 0);
    }

    #[tokio::test]
    async fn test_ctrl_u_clears_input() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        app.input = "draft".to_string();
        app.cursor = 5;

        handle_event(&mut app, ctrl('u')).unwrap();
        assert!(app.input.is_empty());
        assert_eq!(app.cursor, 0);
    }

    #[tokio::test]
    async fn test_quit_keys() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        handle_event(&mut app, ctrl('c')).unwrap();
        assert!(app.should_quit);

        let mut app = test_app(&dir);
        handle_event(&mut app, press(KeyCode::Esc)).unwrap();
        assert!(app.should_quit);
    }

    #[tokio::test]
    async fn test_enter_submits_and_ctrl_d_is_refused_while_loading() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        app.input = "hi".to_string();
        app.cursor = 2;

        handle_event(&mut app, press(KeyCode::Enter)).unwrap();
        assert!(app.is_loading());

        handle_event(&mut app, ctrl('d')).unwrap();
        assert!(app.status.as_ref().map(|s| s.is_error).unwrap_or(false));

        app.wait_for_turn().await.unwrap();
        assert_eq!(app.turns.len(), 2);
    }
}
