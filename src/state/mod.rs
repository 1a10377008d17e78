pub mod rtt;
pub mod session;

pub use rtt::*;
pub use session::*;
