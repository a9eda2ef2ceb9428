//! Stream combinators that don't belong to any one crate.
//!
//! - [`fan_in`] merges any number of streams into one, yielding items in the
//!   order they become ready and finishing once every input has finished.
//! - [`StreamDoneExt::on_done`] runs a callback (with the number of items
//!   seen) when a stream finishes, which is handy for logging per-source
//!   totals without collecting anything.
//!
//! Nothing in here depends on a specific runtime; wakers do all the work.

mod done;
mod fan_in;

pub use crate::done::{OnDone, StreamDoneExt};
pub use crate::fan_in::{FanIn, fan_in};
