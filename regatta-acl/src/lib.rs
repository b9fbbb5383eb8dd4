//! Authentication, authorization and identity core for the Regatta cluster
//! scheduler.
//!
//! This crate is the cluster's security perimeter: it issues and validates
//! bearer credentials, resolves them into capability objects, answers
//! capability questions for every RPC handler, and federates identity
//! provider logins (OIDC, JWT) into native tokens.
//!
//! The consensus log, the RPC transport, the scheduler's own state and the
//! OIDC provider library are external collaborators reached through seams:
//! [`fsm::RaftHandle`], plain request/response structs on
//! [`rpc::AclEndpoint`], read-only workload mirrors in [`state`], and
//! [`oidc::OidcProvider`].

pub mod bootstrap;
pub mod cache;
pub mod capability;
pub mod claims;
pub mod compiler;
pub mod config;
pub mod error;
pub mod fsm;
pub mod jwt;
pub mod oidc;
pub mod resolver;
pub mod rpc;
pub mod rules;
pub mod selector;
pub mod state;
pub mod types;

pub use capability::{Capability, CapabilitySet, NamespaceValidator};
pub use error::{AclError, ResolveError};
pub use resolver::{LeaderSecret, TokenResolver};
pub use rpc::AclEndpoint;
