pub mod event;
pub mod query;
pub mod response;
pub mod transaction;
pub mod wallet;

pub use event::*;
pub use query::*;
pub use response::*;
pub use transaction::*;
pub use wallet::*;
