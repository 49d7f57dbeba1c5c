// HTTP routes
pub mod health;
pub mod queue;
pub mod stream;

pub use health::*;
pub use queue::*;
pub use stream::*;
