//! Overlay core for live card-game streams.
//!
//! Events from the game server flow through the [`connection`] boundary into
//! the [`reconciler`], which owns the render state. The [`overlay`] loop turns
//! each reconciliation into a redraw, timers and sprite animations.

pub mod animation;
pub mod assets;
pub mod channel;
pub mod config;
pub mod connection;
pub mod controls;
pub mod error;
pub mod model;
pub mod overlay;
pub mod profile;
pub mod queue;
pub mod reconciler;
pub mod render;
pub mod seats;
pub mod timers;

#[cfg(test)]
mod tests;

pub use channel::{BindingSource, ChannelBinding};
pub use config::{OverlayConfig, ReconnectPolicy};
pub use connection::{ConnectionManager, ConnectionState, Inbound, Screen};
pub use error::{AssetError, ChannelError, Error, Result};
pub use model::OverlayState;
pub use overlay::Overlay;
pub use reconciler::{Reconciler, Reconciliation};
pub use render::{Renderer, TableView, TextRenderer};
