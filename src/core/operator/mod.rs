// Operator surface - commands, community lifecycle and the read-only view.

pub mod community_view;
pub mod operator_service;

#[allow(unused_imports)]
pub use community_view::CommunityView;
pub use operator_service::*;
