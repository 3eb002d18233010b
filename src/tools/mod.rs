//! Tool surface: trait, execution records, and per-run selection.

pub mod execution;
pub mod select;
pub mod tool;

pub use execution::ToolExecution;
pub use select::{disconnect_connectable_tools, select_tools, ToolFilter, ToolProvider};
pub use tool::{FunctionTool, Tool, ToolDefinition};
