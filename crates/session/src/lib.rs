//! Codelab authenticated request pipeline
//!
//! - [`TokenHolder`] keeps the access credential and runs the proactive refresh timer
//! - [`AuthSession`] attaches the credential to every call and recovers from a 401
//!   with a single shared refresh followed by one replay
//! - [`SubmissionWatcher`] follows a judging job over push and poll until it is final

#[macro_use]
extern crate tracing;

pub mod config;
pub mod coordinator;
mod proactive;
pub mod push;
pub mod refresh;
pub mod session;
pub mod signal;
pub mod token;
pub mod watcher;

pub use config::{AuthConfig, ConfigError, PipelineConfig, WatchConfig};
pub use coordinator::RefreshCoordinator;
pub use push::{PushChannel, PushError, SocketPushChannel};
pub use refresh::{RefreshError, TokenRefresher};
pub use session::AuthSession;
pub use signal::{AuthEvent, AuthSignal};
pub use token::{FileSessionCache, MemorySessionCache, SessionCache, TokenHolder};
pub use watcher::{StatusSource, SubmissionWatcher, WatchError, WatchHandle};
