// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device Auth Server - Activation & Signature Protocol Engine
//!
//! Server half of a mutual device authentication protocol. A mobile device
//! is paired with a user account through an ECDH key exchange, then signs
//! requests with counter-based multi-factor signatures the server verifies.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `config` - Environment configuration
//! - `crypto` - Crypto provider, key schedule and signature algorithm
//! - `engine` - Protocol engines and the service façade
//! - `storage` - Transactional store (redb) and repositories

pub mod api;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod models;
pub mod state;
pub mod storage;
