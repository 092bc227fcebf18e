//! Tasks, task results and the handlers that process them

mod handler;
mod model;

pub use handler::{
    blocking_handler_fn, handler_fn, BlockingFnHandler, FnHandler, HandlerError, TaskHandler,
    DEFAULT_POLLING_INTERVAL,
};
pub(crate) use handler::{panic_message, PollingIntervalOverride};
pub use model::{Task, TaskExecLog, TaskResult, TaskResultStatus};
