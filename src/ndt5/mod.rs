//! The legacy message-framed NDT protocol (ndt5): codec and driver.

pub mod codec;
pub mod protocol;

pub use protocol::AttemptError;
