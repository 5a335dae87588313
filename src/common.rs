mod bus;
mod channel;
mod frame;
mod presence;

pub use bus::*;
pub use channel::*;
pub use frame::*;
pub use presence::*;
