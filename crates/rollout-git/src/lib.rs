//! Versioned manifest repository for the rollout engine.
//!
//! This crate provides:
//! - The `GitBackend` trait over the handful of git operations a rollout needs
//! - A `git` command-line implementation of that trait
//! - `Repository`, the working copy with idempotent clone, no-op-on-clean
//!   commit and the conflict-safe push loop

pub mod backend;
pub mod cli;
pub mod repository;

pub use backend::{GitBackend, Signature};
pub use cli::GitCli;
pub use repository::{CloneOptions, CommitOptions, PushOptions, Repository};
