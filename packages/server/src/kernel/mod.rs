//! Infrastructure primitives that sit underneath the schedules domain: time,
//! outbound dispatch, and the background worker loop.

pub mod clock;
pub mod dispatcher;
pub mod worker;

pub use clock::{Clock, SystemClock};
pub use dispatcher::Dispatcher;
pub use worker::Worker;
