//! Server-authoritative room core for a cooperative horde shooter.

pub mod ai;
pub mod combat;
pub mod config;
pub mod constants;
pub mod entities;
pub mod error;
pub mod geometry;
pub mod heap;
pub mod navigation;
pub mod protocol;
pub mod registry;
pub mod rng;
pub mod room;
pub mod scheduler;
pub mod spatial;
pub mod steering;
pub mod types;
pub mod world;
