//! Data models for chatroom entities

mod media;
mod message;

pub use media::*;
pub use message::*;
