//! Sanity checks for Fallout: New Vegas installs managed by a mod manager.

pub mod archive;
pub mod checks;
pub mod cli;
pub mod config;
pub mod error;
pub mod finding;
pub mod fnv;
pub mod game;
pub mod geck;
pub mod host;
pub mod identity;
pub mod installer;
pub mod lifecycle;
pub mod local;
pub mod logging;
pub mod mitigation;
pub mod nexus;
pub mod overrides;
pub mod patcher;
pub mod presence;
pub mod registry;

#[cfg(test)]
mod testing;
