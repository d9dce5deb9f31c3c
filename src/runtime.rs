//! Script runtime - the single V8 isolate shared by every micro-app.
//!
//! Its `globalThis` is the host global. The `micro_host` extension installs
//! the host utilities and the sandbox machinery from `bootstrap.js`:
//! - console.log/info/debug/warn/error (captured, mirrored to tracing)
//! - atob, btoa, crypto.randomUUID
//! - fetch() restricted to the configured origin allowlist
//!
//! The runtime lives behind `Rc<RefCell<_>>` and is never borrowed across an
//! await point, so loader tasks and the event loop can interleave freely on
//! one thread.

use crate::config::HostConfig;
use crate::error::{MicroAppError, Result};
use crate::fetch::FetchConfig;
use crate::ops::{micro_host, ConsoleOutput};
use crate::sandbox::SandboxTable;
use deno_core::{JsRuntime, OpState, PollEventLoopOptions, RuntimeOptions};
use serde::de::DeserializeOwned;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone)]
pub struct ScriptRuntime {
    inner: Rc<RefCell<JsRuntime>>,
}

impl ScriptRuntime {
    pub fn new(config: &HostConfig) -> Self {
        // Configure V8 heap limits if specified
        let create_params = config.max_heap_size.map(|max_bytes| {
            deno_core::v8::Isolate::create_params().heap_limits(0, max_bytes)
        });

        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![micro_host::init_ops_and_esm()],
            create_params,
            ..Default::default()
        });

        if config.max_heap_size.is_some() {
            runtime.add_near_heap_limit_callback(|current, initial| {
                // Keep the limit so V8 reports OOM instead of growing
                tracing::error!(
                    current_mb = current / (1024 * 1024),
                    initial_mb = initial / (1024 * 1024),
                    "script runtime near heap limit"
                );
                current
            });
        }

        {
            let op_state = runtime.op_state();
            let mut state = op_state.borrow_mut();
            state.put(ConsoleOutput::default());
            state.put(SandboxTable::default());
            state.put(FetchConfig {
                allowed_origins: config.allowed_origins.clone(),
            });
        }

        Self {
            inner: Rc::new(RefCell::new(runtime)),
        }
    }

    pub fn op_state(&self) -> Rc<RefCell<OpState>> {
        self.inner.borrow_mut().op_state()
    }

    pub(crate) fn with_sandboxes<R>(&self, f: impl FnOnce(&mut SandboxTable) -> R) -> R {
        let op_state = self.op_state();
        let mut state = op_state.borrow_mut();
        f(state.borrow_mut::<SandboxTable>())
    }

    /// Runs a classic script against the host global.
    pub fn execute(&self, name: &'static str, code: String) -> Result<()> {
        self.inner
            .borrow_mut()
            .execute_script(name, code)
            .map(|_| ())
            .map_err(|e| MicroAppError::Script(e.to_string()))
    }

    /// Runs a script whose completion value is a JSON string and decodes it.
    pub fn eval_json<T: DeserializeOwned>(&self, code: String) -> Result<T> {
        let mut runtime = self.inner.borrow_mut();
        let value = runtime
            .execute_script("<host>", code)
            .map_err(|e| MicroAppError::Script(e.to_string()))?;

        let text = {
            let scope = &mut runtime.handle_scope();
            let local = deno_core::v8::Local::new(scope, &value);
            if !local.is_string() {
                return Err(MicroAppError::Script(
                    "expected a JSON string result".to_string(),
                ));
            }
            local.to_rust_string_lossy(scope)
        };

        serde_json::from_str(&text).map_err(|e| MicroAppError::Script(e.to_string()))
    }

    /// Drives pending script-side async work (timers, fetch) to completion.
    ///
    /// Polls instead of awaiting `run_event_loop` so the runtime is only
    /// borrowed for the duration of each poll.
    pub async fn run_event_loop(&self) -> Result<()> {
        std::future::poll_fn(|cx| {
            self.inner
                .borrow_mut()
                .poll_event_loop(cx, PollEventLoopOptions::default())
        })
        .await
        .map_err(|e| MicroAppError::Script(e.to_string()))
    }

    /// Captured console output so far.
    pub fn console(&self) -> ConsoleOutput {
        self.op_state().borrow().borrow::<ConsoleOutput>().clone()
    }

    /// Returns and clears the captured console output.
    pub fn take_console(&self) -> ConsoleOutput {
        std::mem::take(self.op_state().borrow_mut().borrow_mut::<ConsoleOutput>())
    }

    /// Forgets a sandbox. Tolerates a runtime that is busy (e.g. a sandbox
    /// dropped from inside script execution): the ledger entry is still
    /// removed and the scope object becomes unreachable on the next release.
    pub(crate) fn release_sandbox(&self, id: u32) {
        let Ok(mut runtime) = self.inner.try_borrow_mut() else {
            tracing::debug!(sandbox = id, "runtime busy, deferring scope release");
            return;
        };
        if let Ok(mut state) = runtime.op_state().try_borrow_mut() {
            state.borrow_mut::<SandboxTable>().remove(id);
        }
        if let Err(e) = runtime.execute_script(
            "<sandbox>",
            format!("globalThis.__microApp.release({})", id),
        ) {
            tracing::warn!(sandbox = id, error = %e, "failed to release sandbox scope");
        }
    }
}
