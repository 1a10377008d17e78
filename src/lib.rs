// Public API - engine, wire codec and data types
pub mod config;
pub mod engine;
pub mod export;
pub mod probe;
pub mod state;

// Command-line surface and name lookups
pub mod cli;
pub mod lookup;
pub mod prefs;
