// Platform port - what the engine needs from the hosting site.

pub mod platform_client;
pub mod platform_models;

pub use platform_client::*;
pub use platform_models::*;
