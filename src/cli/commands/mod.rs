pub mod advance;
pub mod board;
pub mod create;
pub mod launch;
pub mod move_item;
pub mod signal;
pub mod status;

pub use advance::AdvanceCommand;
pub use board::BoardCommand;
pub use create::CreateCommand;
pub use launch::LaunchCommand;
pub use move_item::MoveCommand;
pub use signal::SignalCommand;
pub use status::StatusCommand;
