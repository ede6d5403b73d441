//! Background fetcher: outcome classification and the single fetch loop.

pub mod classify;
pub mod worker;

pub use worker::{FetchSleep, Fetcher};
