//! Acquire API credentials by watching a user log in through a real browser.
//!
//! A [`LoginEngine`] drives a visible browser to a service's login page, feeds
//! page traffic to the service's [`TrafficObserver`] until login is detected,
//! and then either builds the credential from what was captured or runs a
//! headless [`FollowupAutomation`] that mints an API key. Results are kept in a
//! [`CredentialStore`], a JSON document keyed by service name.
//!
//! The browser itself is a collaborator behind the traits in [`driver`].
//! [`testing`] provides a scripted implementation.
//!
//! # Modules
//!
//! * [`credential`] - credential variants and their HTTP headers
//! * [`store`] - discriminated JSON persistence
//! * [`service`], [`registry`], [`catalog`] - service descriptors and lookup
//! * [`observer`] - traffic observers
//! * [`followup`] - headless follow-up automations
//! * [`session`] - the login state machine
//! * [`broker`] - store-or-login credential acquisition
//! * [`config`] - layered configuration

pub mod broker;
pub mod catalog;
pub mod check;
pub mod config;
pub mod credential;
pub mod driver;
pub mod error;
pub mod followup;
pub mod observer;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
pub mod testing;

pub use broker::{CredentialBroker, CredentialSource};
pub use check::{CheckExpectation, CredentialCheck};
pub use config::Config;
pub use credential::{Credential, CredentialStatus};
pub use driver::{BrowserHandle, BrowserLauncher, ContextHandle, DriverError, LaunchOptions, PageHandle, TrafficSubscription};
pub use error::{Error, LoginFailure, Result};
pub use followup::{Automation, FollowupAutomation, FollowupSettings, FollowupSpec};
pub use latchkey_protocol as protocol;
pub use observer::{CaptureSlot, ObserverSpec, TrafficObserver};
pub use registry::Registry;
pub use service::ServiceDescriptor;
pub use session::{EngineSettings, LoginAttempt, LoginEngine, SessionState, Strategies};
pub use store::CredentialStore;
