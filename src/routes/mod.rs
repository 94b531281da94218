pub mod tx;
pub mod wallet;
