//! Deterministic scoring core for Hearth.
//!
//! Every function in this crate is pure over its inputs. Time is always passed
//! in explicitly (`now`), never read from the clock, so identical inputs give
//! identical outputs.

pub mod auth;
pub mod chat_mode;
pub mod confidence;
pub mod error;
pub mod failure;
pub mod intervention;
pub mod recommendations;
pub mod seasonal;
pub mod systems;
