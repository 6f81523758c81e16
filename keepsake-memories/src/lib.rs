//! # Keepsake Memories
//!
//! Features that only make sense for a signed-in user. Every operation reads the current
//! session from a [`keepsake_flow::SessionController`] and is scoped to its identity.
//!
//! - **[`MemoryJournal`]**: photo memories with a label, stored in an [`ObjectStore`] and
//!   indexed in a [`MemoryRepository`].
//! - **[`Conversation`]**: a chat transcript backed by a [`ChatBackend`] such as
//!   [`HttpChatBackend`].

#![warn(missing_docs)]

/// Chat transcripts and backends.
pub mod chat;
/// The session-scoped photo journal.
pub mod journal;
/// Blob storage for uploaded photos.
pub mod object_store;
/// Persistence for memory records.
pub mod repository;

pub use chat::{ChatBackend, ChatError, ChatMessage, Conversation, HttpChatBackend, Role};
pub use journal::{JournalError, MemoryJournal};
pub use object_store::{MemoryObjectStore, ObjectStore, ObjectStoreError};
pub use repository::{InMemoryRepository, MemoryRecord, MemoryRepository};
