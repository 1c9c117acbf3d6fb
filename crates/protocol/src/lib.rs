//! Wire types shared between the latchkey engine and browser drivers.
//!
//! * [`cookie`] - cookies and the storage-state snapshot moved between browser processes
//! * [`traffic`] - network and script observations fed to traffic observers

pub mod cookie;
pub mod traffic;

pub use cookie::{Cookie, LocalStorageEntry, OriginState, SameSite, StorageState};
pub use traffic::{RequestEvent, ResponseEvent, ScriptResult, TrafficEvent};
