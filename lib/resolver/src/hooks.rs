use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

/// Where in the response a fetch happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    /// JSON pointer of the node that triggered the fetch, e.g. `/data/users/0`.
    pub current_path: String,
}

pub trait BeforeFetchHook: Send + Sync {
    fn on_before_fetch(&self, ctx: &HookContext, input: &[u8]);
}

pub trait AfterFetchHook: Send + Sync {
    /// `single_flight` is set when the response was shared with another in-flight call.
    fn on_data(&self, ctx: &HookContext, output: &[u8], single_flight: bool);
    fn on_error(&self, ctx: &HookContext, output: &[u8], single_flight: bool);
}

/// Runs a hook callback. A panicking hook is logged and otherwise ignored.
pub(crate) fn run_hook<F: FnOnce()>(hook_name: &'static str, path: &str, callback: F) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!(hook = hook_name, path, "fetch hook panicked, ignoring");
    }
}
