#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod agent;
pub mod attributes;
pub mod candidate;
pub mod checklist;
mod error;
pub mod events;
pub mod foundation;
pub mod harvest;
pub mod rand;
pub mod state;
pub mod stream;
pub mod stun_stack;
pub mod transport;
pub mod url;

pub use error::Error;
