//! Actor model implementation for the Signaling Controller.
//!
//! ```text
//! MatchmakerActor (singleton per SC instance)
//! ├── owns the matchmaking core (registry, queue, negotiations, calls)
//! └── supervises N ConnectionActors
//!     └── ConnectionActor (one per WebSocket participant)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: every matchmaking mutation runs inside the matchmaker's
//!   message loop, so pairing, cancellation and cleanup never interleave
//! - **Never await a participant**: the matchmaker delivers with `try_send`;
//!   a full connection mailbox drops the event, a closed one unregisters the
//!   participant
//! - **CancellationToken propagation**: connection actors run on child tokens
//!   of the matchmaker's root token
//! - **Mailbox monitoring**: depth thresholds with metrics
//!   (Matchmaker: 500/2000, Connection: 32/128)
//!
//! # Modules
//!
//! - [`matchmaker`] - `MatchmakerActor` singleton
//! - [`connection`] - `ConnectionActor` per participant
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod matchmaker;
pub mod messages;
pub mod metrics;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use matchmaker::{MatchmakerActor, MatchmakerActorHandle, MatchmakerSettings};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
