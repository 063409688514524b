//! Mock collaborators for testing.

mod comms;
pub use comms::{Comms, Error};
mod reporter;
pub use reporter::{Event, Reporter};
mod sender;
pub use sender::Sender;
