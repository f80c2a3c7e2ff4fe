//! Core types and trait definitions for Kindred.
//!
//! This crate has no HTTP or database dependencies. It defines the profile
//! model, the published session value, and the two collaborator traits
//! ([`identity::IdentityProvider`] and [`directory::DirectoryService`]) that
//! the session engine consumes.

// Trait declarations spell out `Send` futures; impls use native `async fn`.
#![allow(async_fn_in_trait)]

pub mod directory;
pub mod error;
pub mod identity;
pub mod profile;
pub mod report;
pub mod session;

pub use error::{Error, ErrorKind, Result};
