mod entry;
mod money;
mod page;
mod user;
mod wallet;

pub use entry::*;
pub use money::*;
pub use page::*;
pub use user::*;
pub use wallet::*;
