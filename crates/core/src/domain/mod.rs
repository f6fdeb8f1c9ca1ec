pub mod contract;
pub mod decision;
pub mod recommendation;
pub mod signal;
pub mod transaction;
