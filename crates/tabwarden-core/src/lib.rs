pub mod bridge;
pub mod config;
pub mod engine;
pub mod events;
pub mod facade;
pub mod host;
pub mod hostname;
pub mod ipc;
pub mod ledger;
pub mod matcher;
pub mod policy;
pub mod tracker;

pub use bridge::BridgeHost;
pub use engine::{Engine, Envelope};
pub use events::{HostCommand, HostEvent, IdleSignal, TabId, TabInfo, WindowId};
pub use host::BrowserHost;
pub use policy::Verdict;
pub use tracker::ActivityTracker;
