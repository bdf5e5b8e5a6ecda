//! Sliding-window rate limiting backed by a durable store.

mod clock;
mod history;
mod limiter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use history::ActionHistory;
pub use limiter::{Acquisition, RequestRateLimiter, StorageFault};
