// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! SQLite-backed implementation of [`dispatch_core::Store`].
//!
//! One table per keyspace, `journal_mode=WAL` plus a busy timeout so readers
//! never block writers for long. All access goes through `spawn_blocking`
//! since `rusqlite::Connection` is synchronous; the connection itself is
//! guarded by a plain `std::sync::Mutex` since no call holds it across an
//! await point (grounded on spec §4.1, with exact keyspace semantics taken
//! from `store.go`'s bucket layout).

mod sqlite_store;

pub use sqlite_store::SqliteStore;
