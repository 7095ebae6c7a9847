//! # parley-core
//!
//! Connection hub, client sessions and room resolution for the Parley chat
//! hub.
//!
//! This crate provides the building blocks of the server:
//!
//! - **Hub** - single owner of the live-connection registry; routes messages
//!   and presence notices onto session queues
//! - **Session** - per-connection read and write loops
//! - **Resolver** - finds or creates the one room per pair of users and
//!   persists messages into it
//! - **Directory** - read-side queries (history, chat lists)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Session    │────▶│  Resolver   │────▶│  ChatStore  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐     ┌─────────────┐
//! │    Hub      │────▶│ peer queues │
//! └─────────────┘     └─────────────┘
//! ```

pub mod directory;
pub mod hub;
pub mod message;
pub mod presence;
pub mod profile;
pub mod resolver;
pub mod session;
pub mod store;

pub use directory::{ChatDirectory, DirectoryError};
pub use hub::{spawn_hub, HubConfig, HubError, HubHandle, HubStats, SessionHandle, SessionId};
pub use message::{ChatMessage, ChatRoom, Envelope};
pub use presence::NotificationPolicy;
pub use profile::{ChatSummary, ProfileError, ProfileSource, UserProfile};
pub use resolver::{Resolution, ResolveError, RoomResolver};
pub use session::{SessionConfig, SessionContext};
pub use store::{ChatStore, InMemoryStore, StoreError};
