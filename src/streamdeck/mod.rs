//! The Stream Deck side of the plugin: wire events and the host connection.

mod connection;
pub mod events;

pub use connection::{connect, EventReader, LaunchInfo, StreamDeckHost};

use crate::compositor::KeyImage;
use anyhow::Result;

/// Where key images and browser requests are sent.
pub trait Host: Send + Sync + 'static {
    fn set_image(&self, context: &str, image: &KeyImage) -> Result<()>;
    fn open_url(&self, url: &str) -> Result<()>;
}
