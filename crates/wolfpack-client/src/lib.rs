//! Client-side state for Wolfpack: the service layer, realtime channels, and
//! the stateful pieces the app screens are built from.

pub mod debounce;
pub mod error;
pub mod like;
pub mod members;
pub mod realtime;
pub mod resource;
pub mod scope;
pub mod service;
pub mod typing;

#[cfg(test)]
mod mock;

pub use error::{ErrorKind, ServiceError};
pub use service::{ClientConfig, HttpService, WolfpackService};
