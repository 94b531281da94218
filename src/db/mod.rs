pub mod tx;
pub mod user;
