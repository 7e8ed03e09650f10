//! Data Transfer Objects (DTOs) for the inspector server.
//!
//! - `http`: HTTP discovery endpoint response DTOs

pub mod http;
