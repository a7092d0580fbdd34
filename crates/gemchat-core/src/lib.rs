pub mod ai;
pub mod config;
pub mod error;
pub mod session;
pub mod state;
pub mod store;
pub mod turn;

// Re-export main types for convenience
pub use ai::{Fragment, FragmentStream, GeminiChat, ReplyService};
pub use config::Config;
pub use error::{ChatError, ServiceError, StorageError};
pub use session::{ChatSession, FailedTurnPolicy};
pub use state::{ChatRole, ChatTurn};
pub use store::ConversationStore;
pub use turn::{TurnProcessor, TurnState};
