// Policy engine - validated per-community configuration.

pub mod policy_models;
pub mod policy_validator;

pub use policy_models::*;
pub use policy_validator::*;
