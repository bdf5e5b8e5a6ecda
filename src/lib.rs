//! galaxy-throttle - persisted sliding-window rate limiting
//!
//! This crate throttles the two user-triggered actions of the Code Galaxy
//! site: sending a registration email and sending an AI chat message. Each
//! limiter keeps a log of recent action timestamps in a durable key-value
//! store so the limit survives restarts, and answers whether a new action is
//! currently permitted.

pub mod chat;
pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;
pub mod registry;
pub mod store;
