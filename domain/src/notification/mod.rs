//! The notification panel's data: model, collection and the live channel
//! that keeps them current.

pub mod channel;
pub mod collection;
pub mod model;

pub use channel::{Channel, ChannelConfig, WeakChannel};
pub use collection::Collection;
pub use model::{Notification, NotificationId};
