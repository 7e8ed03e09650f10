//! Infrastructure layer: sockets, address handling and wire DTOs.

pub mod address;
pub mod dto;
pub mod listener;
