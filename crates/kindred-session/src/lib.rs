//! Session/profile reconciliation for Kindred.
//!
//! A [`SessionManager`] watches an [`IdentityProvider`], keeps one live
//! profile subscription open at the [`DirectoryService`] for whoever is
//! signed in, and publishes the resulting
//! [`SessionSnapshot`](kindred_core::session::SessionSnapshot). Profile
//! writes go through its [`MutationGateway`].
//!
//! [`IdentityProvider`]: kindred_core::identity::IdentityProvider
//! [`DirectoryService`]: kindred_core::directory::DirectoryService

mod gateway;
mod identity;
mod manager;
mod reconcile;
mod subscription;

pub mod config;

pub use config::SessionConfig;
pub use gateway::MutationGateway;
pub use manager::SessionManager;
