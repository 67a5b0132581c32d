//! Core provisioning workflow for beryl.
//!
//! Beryl manages a locally running authorization service instance. This
//! crate contains the template catalog, the asset cache, the readiness
//! probe, the directory bootstrap sequence, and the provisioning
//! orchestrator that composes them into a single `templates install`
//! workflow. The container runtime, the directory service, and the
//! authorizer are external collaborators reached through the traits in
//! [`lifecycle`], [`health`], [`directory`], [`assertions`], and
//! [`console`].

pub mod assertions;
pub mod assets;
pub mod config;
pub mod console;
pub mod directory;
pub mod health;
pub mod lifecycle;
pub mod provision;
pub mod template;
