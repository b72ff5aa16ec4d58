//! Retrieval & context assembly.
//!
//! The read-side surface every tool in `substrate-mcp` calls into: [`recall::recall`] (the
//! unified search/view/purge/restore operation), [`session_context::assemble`] (the
//! progressive-disclosure index a session-start hook writes to standard output), and
//! [`suggestion::format_tool_suggestion`] (wraps the conversation router's output as a
//! notification). All three share the token/character budgeting in [`budget`].

pub mod budget;
pub mod recall;
pub mod session_context;
pub mod suggestion;

pub use budget::{BudgetedList, CHARS_PER_TOKEN, COMPACT_TOKEN_BUDGET, FULL_TOKEN_BUDGET};
pub use recall::{recall, DetailLevel, RecallAction, RecallError, RecallItem, RecallRequest, RecallResponse};
pub use session_context::{assemble_session_start_context, SessionStartContext, SESSION_START_CHAR_BUDGET};
pub use suggestion::format_tool_suggestion;
