pub mod chat;
pub mod routing;

pub use chat::*;
pub use routing::*;
