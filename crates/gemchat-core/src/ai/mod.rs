pub mod fragment;
pub mod gemini;
pub mod sse;

pub use fragment::Fragment;
pub use gemini::GeminiChat;

use futures_util::stream::BoxStream;

use crate::error::ServiceError;

/// The lazily produced pieces of one streamed reply.
pub type FragmentStream<'a> = BoxStream<'a, Result<Fragment, ServiceError>>;

/// A conversational completion service that keeps its own running context.
///
/// Each call to [`send_message`](ReplyService::send_message) continues the
/// conversation; callers never re-send earlier turns.
pub trait ReplyService: Send {
    /// Send one user message and stream back the reply fragments.
    fn send_message<'a>(&'a mut self, text: &str) -> FragmentStream<'a>;

    /// Forget the running conversation context.
    fn reset(&mut self);
}
