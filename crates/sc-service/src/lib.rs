//! Signaling Controller (SC) Service Library
//!
//! Pairs anonymous participants who want to debate the same topic, runs a
//! mutual accept/reject handshake between them, and relays WebRTC
//! negotiation messages between the two members of a call. Media never
//! passes through the SC.
//!
//! # Architecture
//!
//! ```text
//! WebSocket session (one per participant)
//!   └── MatchmakerActorHandle ──► MatchmakerActor (singleton)
//!                                   ├── Matchmaker core
//!                                   │   ├── ConnectionRegistry
//!                                   │   ├── MatchQueue (per topic, FIFO)
//!                                   │   ├── NegotiationTable
//!                                   │   └── CallTable
//!                                   └── ConnectionActor (one per participant)
//!                                         └──► WebSocket writer
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Matchmaker and connection actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-facing error codes
//! - [`matchmaking`] - Synchronous matchmaking core
//! - [`observability`] - Health endpoints and metrics
//! - [`protocol`] - JSON message vocabulary
//! - [`ws`] - WebSocket transport

pub mod actors;
pub mod config;
pub mod errors;
pub mod matchmaking;
pub mod observability;
pub mod protocol;
pub mod ws;
