pub mod error;
pub mod prefs;
pub mod sysfs;
