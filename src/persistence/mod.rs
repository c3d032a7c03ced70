//! Persistence - settings file storage and live reload

pub mod store;

pub use store::SettingsStore;
