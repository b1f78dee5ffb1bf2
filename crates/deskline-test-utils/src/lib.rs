// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Deskline integration tests.
//!
//! Provides an in-process stack on a temporary SQLite database and mock
//! connections that receive server events through the same channel a
//! WebSocket writer would drain.
//!
//! # Components
//!
//! - [`TestHarness`] - Chat service over temp storage, plus caller helpers
//! - [`MockConnection`] - A registered connection with request/expect helpers
//! - [`FaultyStorage`] - Storage wrapper that can fail writes or stall starts

pub mod faulty_storage;
pub mod harness;
pub mod mock_connection;

pub use faulty_storage::FaultyStorage;
pub use harness::{TestHarness, TEST_SESSION_SECRET};
pub use mock_connection::MockConnection;
