//! Slurp - backend gateway for a Cardano meme token
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Chain Primitives
//! - [`address`] - Bech32 address parsing, hex conversion and networks
//! - [`units`] - Lovelace / ADA amounts
//! - [`transaction`] - CBOR transactions, coin selection, fees and witnesses
//!
//! ## Chain Access
//! - [`provider`] - Blockfrost, Koios and in-memory indexers behind one trait
//! - [`cache`] - LRU caches (faucet claim ledger)
//!
//! ## Flows
//! - [`deposit`] - ADA deposit preview, building and submission
//! - [`faucet`] - Token faucet with per-address cooldown
//! - [`relationships`] - Relationship graph, risk scoring and beneficial owners
//!
//! ## Integration
//! - [`api`] - REST API server
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Chain Primitives
// ============================================================================
pub mod address;
pub mod transaction;
pub mod units;

// ============================================================================
// Chain Access
// ============================================================================
pub mod cache;
pub mod provider;

// ============================================================================
// Flows
// ============================================================================
pub mod deposit;
pub mod faucet;
pub mod relationships;

// ============================================================================
// Integration
// ============================================================================
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
