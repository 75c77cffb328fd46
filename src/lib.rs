//! E1.31 (sACN) receiver that maps lighting console universes onto networked
//! show props and drives them with point-to-point commands.
//!
//! Data flows: datagram -> [`parser`] -> [`mapper::UniverseCache`] ->
//! [`mapper::Mapper`] -> [`host::CommandDispatcher`].

pub mod config;
pub mod fixture;
pub mod host;
pub mod listener;
pub mod mapper;
pub mod parser;
pub mod registry;

pub use listener::{ListenerError, Receiver, Status};
