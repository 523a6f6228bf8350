pub mod amount;
pub mod bonding_curve;
pub mod events;
pub mod math;

pub mod interfaces {
    pub mod community_token;
    pub mod group_factory;
}
