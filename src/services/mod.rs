//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the sign-in flow, sessions, and bookmark logic so
//! route handlers can stay focused on protocol translation and cookies.

pub mod auth;
pub mod bookmark;
pub mod callback;
pub mod feed;
pub mod list;
pub mod profile;
pub mod session;
