//! # SC Test Utilities
//!
//! Shared test utilities for the Signaling Controller (SC) service.
//!
//! This crate provides:
//! - `fixtures` - Fast matchmaker settings and configuration variables
//! - `actor_client` - In-process participant driving a `MatchmakerActorHandle`
//! - `server_harness` - `TestScServer`, a real signaling listener on a random port
//! - `ws_client` - WebSocket participant for end-to-end tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let matchmaker = spawn_matchmaker(fast_settings());
//!     let mut alice = TestClient::connect(&matchmaker, "alice").await;
//!     let mut bob = TestClient::connect(&matchmaker, "bob").await;
//!
//!     alice.find_match("Politics").await;
//!     bob.find_match("Politics").await;
//!     alice.expect_proposal().await;
//!     bob.expect_proposal().await;
//! }
//! ```

pub mod actor_client;
pub mod fixtures;
pub mod server_harness;
pub mod ws_client;

// Re-export commonly used items
pub use actor_client::*;
pub use fixtures::*;
pub use server_harness::*;
pub use ws_client::*;
