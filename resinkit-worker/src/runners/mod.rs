/// Concrete runner implementations (§4.7, §4.8, and the test double).
pub mod cdc;
pub mod mock;
pub mod sql;
