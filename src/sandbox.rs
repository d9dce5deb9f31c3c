//! Per-app execution sandbox.
//!
//! The runtime has exactly one real global object, so isolation is emulated
//! by interception: each sandbox owns a scope object inside the isolate,
//! wrapped in proxies (see `bootstrap.js`) that
//!
//! - read own keys from the scope and fall back to the host global,
//!   binding plain host functions to the host so they keep their receiver,
//! - accept writes only while the sandbox is active, recording each key,
//! - delete only keys the scope owns.
//!
//! The activity flag and the injected-key ledger live here, in
//! [`SandboxTable`] inside the runtime's `OpState`, so that `stop()` can
//! revert exactly what the scripts injected.

use crate::error::{MicroAppError, Result};
use crate::runtime::ScriptRuntime;
use indexmap::IndexSet;
use serde::Deserialize;
use std::collections::HashMap;

/// Activity flag and injected-key ledger of one sandbox.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SandboxState {
    pub active: bool,
    pub injected_keys: IndexSet<String>,
}

/// All sandboxes of a runtime, keyed by id. Stored in `OpState`.
#[derive(Debug, Default)]
pub struct SandboxTable {
    next_id: u32,
    entries: HashMap<u32, SandboxState>,
}

impl SandboxTable {
    pub fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.entries.insert(self.next_id, SandboxState::default());
        self.next_id
    }

    pub fn get(&self, id: u32) -> Option<&SandboxState> {
        self.entries.get(&id)
    }

    pub fn is_active(&self, id: u32) -> bool {
        self.entries.get(&id).is_some_and(|state| state.active)
    }

    /// Records an attempted write. Returns whether it may proceed.
    pub fn record(&mut self, id: u32, key: &str) -> bool {
        match self.entries.get_mut(&id) {
            Some(state) if state.active => {
                state.injected_keys.insert(key.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn start(&mut self, id: u32) {
        if let Some(state) = self.entries.get_mut(&id) {
            state.active = true;
        }
    }

    /// Deactivates the sandbox and drains its ledger. `None` when it was
    /// not active, so a second stop has nothing left to revert.
    pub fn stop(&mut self, id: u32) -> Option<Vec<String>> {
        let state = self.entries.get_mut(&id)?;
        if !state.active {
            return None;
        }
        state.active = false;
        Some(state.injected_keys.drain(..).collect())
    }

    pub fn remove(&mut self, id: u32) {
        self.entries.remove(&id);
    }
}

/// A value read through a sandbox, as seen from Rust.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScopeValue {
    Undefined,
    /// Anything JSON can carry.
    Data { value: serde_json::Value },
    /// A callable; `bound` is set when it was rebound to the host global.
    Function { name: String, bound: bool },
    /// Objects JSON cannot represent (cyclic structures, symbols, ...).
    Opaque {
        #[serde(rename = "type")]
        type_name: String,
    },
}

impl ScopeValue {
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            ScopeValue::Data { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, ScopeValue::Undefined)
    }
}

/// Handle to one sandbox. Owned by exactly one [`MicroApp`](crate::MicroApp).
pub struct Sandbox {
    id: u32,
    runtime: ScriptRuntime,
}

fn js_string(key: &str) -> Result<String> {
    serde_json::to_string(key).map_err(|e| MicroAppError::Script(e.to_string()))
}

impl Sandbox {
    pub fn new(runtime: &ScriptRuntime) -> Result<Self> {
        let id = runtime.with_sandboxes(|table| table.allocate());
        let sandbox = Self {
            id,
            runtime: runtime.clone(),
        };
        runtime.execute("<sandbox>", format!("globalThis.__microApp.create({})", id))?;
        Ok(sandbox)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.runtime.with_sandboxes(|table| table.is_active(self.id))
    }

    pub fn injected_keys(&self) -> Vec<String> {
        self.runtime.with_sandboxes(|table| {
            table
                .get(self.id)
                .map(|state| state.injected_keys.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn start(&self) {
        self.runtime.with_sandboxes(|table| table.start(self.id));
    }

    /// Deactivates the sandbox and deletes every injected key from the
    /// scope object. Calling it on an inactive sandbox does nothing.
    pub fn stop(&self) -> Result<()> {
        let Some(keys) = self.runtime.with_sandboxes(|table| table.stop(self.id)) else {
            return Ok(());
        };
        let keys = serde_json::to_string(&keys).map_err(|e| MicroAppError::Script(e.to_string()))?;
        let stuck: Vec<String> = self
            .runtime
            .eval_json(format!("globalThis.__microApp.purge({}, {})", self.id, keys))?;
        if !stuck.is_empty() {
            tracing::warn!(sandbox = self.id, ?stuck, "injected keys could not be deleted");
        }
        Ok(())
    }

    pub fn read(&self, key: &str) -> Result<ScopeValue> {
        self.runtime.eval_json(format!(
            "globalThis.__microApp.read({}, {})",
            self.id,
            js_string(key)?
        ))
    }

    /// Writes through the proxy. Always reports success; while the sandbox
    /// is inactive the write is dropped.
    pub fn write(&self, key: &str, value: &serde_json::Value) -> Result<bool> {
        let value = serde_json::to_string(value).map_err(|e| MicroAppError::Script(e.to_string()))?;
        self.runtime.eval_json(format!(
            "globalThis.__microApp.write({}, {}, {})",
            self.id,
            js_string(key)?,
            value
        ))
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.runtime.eval_json(format!(
            "globalThis.__microApp.remove({}, {})",
            self.id,
            js_string(key)?
        ))
    }

    /// Keys the scope object currently owns.
    pub fn own_keys(&self) -> Result<Vec<String>> {
        self.runtime
            .eval_json(format!("globalThis.__microApp.ownKeys({})", self.id))
    }

    /// Wraps `code` so identifiers resolve against this sandbox's scope
    /// first and the host global second. The sandbox is looked up when the
    /// wrapped code runs, not when it is built.
    pub fn bind_execution(&self, code: &str) -> String {
        format!(
            ";(function (window, self, globalThis, __microAppScope) {{ with (__microAppScope) {{\n;{}\n}} }})\
             .apply(globalThis.__microApp.window({id}), globalThis.__microApp.frame({id}));",
            code,
            id = self.id
        )
    }

    pub fn execute(&self, code: &str) -> Result<()> {
        self.runtime.execute("<micro-app>", self.bind_execution(code))
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.runtime.release_sandbox(self.id);
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use serde_json::json;

    fn sandbox() -> (ScriptRuntime, Sandbox) {
        let runtime = ScriptRuntime::new(&HostConfig::default());
        let sandbox = Sandbox::new(&runtime).unwrap();
        (runtime, sandbox)
    }

    fn host_value(runtime: &ScriptRuntime, key: &str) -> String {
        runtime
            .eval_json::<String>(format!("JSON.stringify(typeof globalThis[{:?}])", key))
            .unwrap()
    }

    #[test]
    fn test_table_ledger() {
        let mut table = SandboxTable::default();
        let id = table.allocate();

        assert!(!table.record(id, "early"));
        table.start(id);
        assert!(table.record(id, "a"));
        assert!(table.record(id, "b"));
        assert!(table.record(id, "a"));
        assert_eq!(table.stop(id), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(table.stop(id), None);
        assert_eq!(table.get(id), Some(&SandboxState::default()));
        assert!(!table.record(99, "x"));
    }

    #[test]
    fn test_write_then_read_while_active() {
        let (_runtime, sandbox) = sandbox();
        sandbox.start();

        assert!(sandbox.write("answer", &json!(42)).unwrap());
        assert_eq!(sandbox.read("answer").unwrap().data(), Some(&json!(42)));
        assert_eq!(sandbox.injected_keys(), vec!["answer"]);
    }

    #[test]
    fn test_inactive_writes_are_dropped() {
        let (_runtime, sandbox) = sandbox();

        assert!(sandbox.write("ghost", &json!("boo")).unwrap());
        assert!(sandbox.read("ghost").unwrap().is_undefined());
        assert!(sandbox.injected_keys().is_empty());
    }

    #[test]
    fn test_stop_reverts_to_host_value() {
        let (runtime, sandbox) = sandbox();
        runtime.execute("<test>", "globalThis.shared = 'host';".to_string()).unwrap();

        sandbox.start();
        sandbox.write("shared", &json!("app")).unwrap();
        assert_eq!(sandbox.read("shared").unwrap().data(), Some(&json!("app")));

        sandbox.stop().unwrap();
        assert!(!sandbox.is_active());
        assert!(sandbox.injected_keys().is_empty());
        assert!(sandbox.own_keys().unwrap().is_empty());
        assert_eq!(sandbox.read("shared").unwrap().data(), Some(&json!("host")));
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let (_runtime, sandbox) = sandbox();
        sandbox.start();
        sandbox.start();
        assert!(sandbox.is_active());
        sandbox.write("k", &json!(1)).unwrap();

        sandbox.stop().unwrap();
        sandbox.stop().unwrap();
        assert!(!sandbox.is_active());
        assert!(sandbox.read("k").unwrap().is_undefined());
    }

    #[test]
    fn test_delete_only_touches_own_keys() {
        let (runtime, sandbox) = sandbox();
        runtime.execute("<test>", "globalThis.hostOnly = 1;".to_string()).unwrap();
        sandbox.start();
        sandbox.write("mine", &json!(true)).unwrap();

        assert!(sandbox.delete("mine").unwrap());
        assert!(sandbox.read("mine").unwrap().is_undefined());
        assert!(sandbox.delete("hostOnly").unwrap());
        assert_eq!(sandbox.read("hostOnly").unwrap().data(), Some(&json!(1)));
    }

    #[test]
    fn test_delete_on_inactive_sandbox_keeps_nothing() {
        let (runtime, sandbox) = sandbox();
        runtime.execute("<test>", "globalThis.hostOnly = 1;".to_string()).unwrap();

        assert!(sandbox.delete("hostOnly").unwrap());
        assert!(sandbox.delete("neverWritten").unwrap());
        assert_eq!(host_value(&runtime, "hostOnly"), "number");
        assert!(sandbox.own_keys().unwrap().is_empty());
    }

    #[test]
    fn test_stop_removes_defined_properties() {
        let (_runtime, sandbox) = sandbox();
        sandbox.start();

        sandbox
            .execute("Object.defineProperty(window, 'pinned', { value: 7 }); window.after = 1;")
            .unwrap();
        assert_eq!(sandbox.read("pinned").unwrap().data(), Some(&json!(7)));

        sandbox.stop().unwrap();
        assert!(sandbox.own_keys().unwrap().is_empty());
        assert!(sandbox.read("pinned").unwrap().is_undefined());
    }

    #[test]
    fn test_scope_cannot_be_frozen() {
        let (_runtime, sandbox) = sandbox();
        sandbox.start();
        sandbox.write("k", &json!(1)).unwrap();

        assert!(sandbox.execute("Object.freeze(window);").is_err());
        sandbox.stop().unwrap();
        assert!(sandbox.own_keys().unwrap().is_empty());
    }

    #[test]
    fn test_bound_execution_after_stop_writes_nowhere() {
        let (runtime, sandbox) = sandbox();
        sandbox.start();
        sandbox.stop().unwrap();

        sandbox.execute("window.after = 1; bare = 2;").unwrap();

        for key in ["after", "bare"] {
            assert!(sandbox.read(key).unwrap().is_undefined(), "{} kept", key);
            assert_eq!(host_value(&runtime, key), "undefined", "{} leaked", key);
        }
        assert!(sandbox.own_keys().unwrap().is_empty());
        assert!(sandbox.injected_keys().is_empty());
    }

    #[test]
    fn test_host_functions_are_bound_constructors_are_not() {
        let (_runtime, sandbox) = sandbox();

        assert_eq!(
            sandbox.read("parseInt").unwrap(),
            ScopeValue::Function {
                name: "bound parseInt".to_string(),
                bound: true
            }
        );
        assert_eq!(
            sandbox.read("Promise").unwrap(),
            ScopeValue::Function {
                name: "Promise".to_string(),
                bound: false
            }
        );
    }

    #[test]
    fn test_bound_execution_is_isolated_from_host() {
        let (runtime, sandbox) = sandbox();
        sandbox.start();

        sandbox
            .execute("window.viaWindow = 1; bare = 2; self.viaSelf = 3; this.viaThis = 4; globalThis.viaGlobal = 5;")
            .unwrap();

        for key in ["viaWindow", "bare", "viaSelf", "viaThis", "viaGlobal"] {
            assert_eq!(host_value(&runtime, key), "undefined", "{} leaked", key);
            assert!(sandbox.read(key).unwrap().data().is_some(), "{} missing", key);
        }
        assert_eq!(sandbox.injected_keys().len(), 5);
    }

    #[test]
    fn test_bound_execution_sees_host_defaults_and_keeps_identity() {
        let (_runtime, sandbox) = sandbox();
        sandbox.start();

        sandbox
            .execute("window.sameAtob = atob === window.atob; window.decoded = atob('aGk=');")
            .unwrap();

        assert_eq!(sandbox.read("sameAtob").unwrap().data(), Some(&json!(true)));
        assert_eq!(sandbox.read("decoded").unwrap().data(), Some(&json!("hi")));
    }

    #[test]
    fn test_sandboxes_do_not_share_scope() {
        let runtime = ScriptRuntime::new(&HostConfig::default());
        let first = Sandbox::new(&runtime).unwrap();
        let second = Sandbox::new(&runtime).unwrap();
        first.start();
        second.start();

        first.execute("window.owner = 'first';").unwrap();
        assert!(second.read("owner").unwrap().is_undefined());
    }

    #[test]
    fn test_released_sandbox_refuses_execution() {
        let runtime = ScriptRuntime::new(&HostConfig::default());
        let sandbox = Sandbox::new(&runtime).unwrap();
        let wrapped = sandbox.bind_execution("window.late = 1;");
        drop(sandbox);

        assert!(runtime.execute("<test>", wrapped).is_err());
        assert_eq!(host_value(&runtime, "late"), "undefined");
    }
}
