pub mod health;
pub mod peer;
pub mod phase;
pub mod station;
