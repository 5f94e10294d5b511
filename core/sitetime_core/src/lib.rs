//! Per-site browsing time tracker with daily limits, break cycles, entry
//! delays, tab caps and time-locked settings.

pub mod browser;
pub mod clock;
pub mod ledger;
pub mod matcher;
pub mod messages;
pub mod settings;
pub mod store;
pub mod tracker;

pub use browser::{Browser, Command, Tab, TabMirror};
pub use clock::{Clock, ManualClock, SystemClock};
pub use messages::{BrowserEvent, Push, Reply, Request, Sender};
pub use settings::Settings;
pub use store::{MemoryStore, SqliteStore, Store, StoreError};
pub use tracker::{BlockState, Tracker, TrackerConfig};
