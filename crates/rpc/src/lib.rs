//! Typed clients for the backend services the gateway consumes.
//!
//! Every backend (auth, user, msg, push, conversation) is reached through an
//! async trait so the gateway can be wired against live HTTP backends in
//! production and recording mocks in tests. [`BackendServices`] bundles one
//! implementation of each behind `Arc`s; `BackendServices::noop()` gives a
//! fully inert set for partial wiring.

pub mod error;
pub mod http;
pub mod mock;
pub mod services;
pub mod types;

pub use {
    error::RpcError,
    services::{
        AuthService, BackendServices, ConversationService, MsgService, PushService,
        ServiceDiscovery, UserService,
    },
};
