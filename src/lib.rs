//! An interactive terminal administration client for ManiaPlanet
//! dedicated servers.
//!
//! The heavy lifting lives in the `gbxremote` crate; this one adds the
//! operator-facing pieces: the command-expression language, the live
//! game-state projection, and the console itself.

pub mod config;
pub mod console;
pub mod syntax;
pub mod tracker;
