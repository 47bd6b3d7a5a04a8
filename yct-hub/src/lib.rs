extern crate self as yct_hub;

pub mod http;
mod hub;

pub use hub::{Hub, OpenError, Settings, SharedHub, now, run_expiry};
