//! Use-case services composing the engine, repositories, and counters.

pub mod review_service;
pub mod session_service;
