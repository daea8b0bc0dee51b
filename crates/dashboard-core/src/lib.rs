//! Client-side session core for the admin dashboard: authentication state,
//! persistence, route guards, and the login redirect protocol.

pub mod auth;
pub mod config;
