//! Host side of the data specification loading phase.
//!
//! The pieces run in this order: [`resources`] proves every placement fits,
//! [`binary`] floods executables, [`transmit`] or [`pipeline`] push the per-core
//! programs, and [`coordinator`] waits for the interpreter fleet to finish.
//! [`routing`] loads router tables independently of the rest.

pub mod binary;
pub mod coordinator;
pub mod pipeline;
pub mod progress;
pub mod resources;
pub mod routing;
pub mod transmit;
