//! Request handlers.

pub mod download;
pub mod health;
pub mod status;
pub mod video;

pub use download::*;
pub use health::*;
pub use status::*;
pub use video::*;
