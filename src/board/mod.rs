// Work items, the column layout and guarded moves between columns

pub mod allocator;
pub mod layout;
pub mod state_machine;
pub mod types;

pub use allocator::{AllocationError, IdAllocator};
pub use layout::{BoardLayout, Column};
pub use state_machine::{BoardError, BoardStateMachine, MoveOutcome, UnchangedReason};
pub use types::{ColumnId, ItemId, NewWorkItem, Trigger, WorkItem, DEFAULT_ID_WIDTH};
