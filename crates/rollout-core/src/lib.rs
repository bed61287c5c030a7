//! Core domain types and traits for the rollout engine.
//!
//! This crate contains:
//! - Release, release set and image types
//! - The error taxonomy shared by every component
//! - Label selector builder and reverse label lookup
//! - Execution context (deadline + cancellation) and the retry loop
//! - Platform and renderer traits
//! - Repository credentials

pub mod context;
pub mod error;
pub mod id;
pub mod image;
pub mod platform;
pub mod release;
pub mod renderer;
pub mod retry;
pub mod secret;
pub mod selector;

pub use context::ExecContext;
pub use error::{Error, Result};
pub use id::RequestId;
pub use image::ImageDefinition;
pub use release::{Release, ReleaseSet};
pub use secret::GitCredential;
pub use selector::{ReleaseRequest, ReleaseRequestBuilder};
