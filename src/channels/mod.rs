pub mod formatting;
mod hub;
mod stream;

pub use hub::ChannelHub;
pub use stream::{DeliveryMode, StreamSink};
