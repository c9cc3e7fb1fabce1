//! API Routes

pub mod attendance;
pub mod door;
pub mod sessions;
