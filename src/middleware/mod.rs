//! Middleware module
//!
//! Bearer authentication for the chat routes and request logging

pub mod auth;
pub mod logging;
