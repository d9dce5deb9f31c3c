//! Ops backing the host global and the sandbox proxies.
//!
//! `bootstrap.js` installs these onto `globalThis` (console, atob/btoa,
//! crypto.randomUUID, fetch) and wires the sandbox proxy traps to the
//! ledger kept in `OpState`.

use crate::fetch::op_fetch;
use crate::sandbox::SandboxTable;
use anyhow::{anyhow, Error};
use deno_core::{op2, OpState};

// ============================================================================
// Console Output Capture
// ============================================================================

/// Captured console output from micro-app scripts
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

#[op2(fast)]
fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    tracing::info!(target: "micro_app::console", "{}", msg);
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.logs.push(msg.to_string());
    }
}

#[op2(fast)]
fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    tracing::warn!(target: "micro_app::console", "{}", msg);
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(msg.to_string());
    }
}

#[op2(fast)]
fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    tracing::error!(target: "micro_app::console", "{}", msg);
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.errors.push(msg.to_string());
    }
}

// ============================================================================
// Sandbox Ledger
// ============================================================================

/// Records `key` as injected and reports whether the write may proceed.
/// Writes to an inactive (or unknown) sandbox are dropped without error.
#[op2(fast)]
fn op_sandbox_record(state: &mut OpState, id: u32, #[string] key: &str) -> bool {
    state
        .try_borrow_mut::<SandboxTable>()
        .map(|table| table.record(id, key))
        .unwrap_or(false)
}

#[op2(fast)]
fn op_sandbox_is_active(state: &mut OpState, id: u32) -> bool {
    state
        .try_borrow::<SandboxTable>()
        .map(|table| table.is_active(id))
        .unwrap_or(false)
}

// ============================================================================
// Host Utilities
// ============================================================================

#[op2]
#[string]
fn op_crypto_random_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[op2]
#[string]
fn op_btoa(#[string] data: &str) -> Result<String, Error> {
    use base64::Engine;
    // btoa expects Latin-1, but we'll be lenient and accept UTF-8
    Ok(base64::engine::general_purpose::STANDARD.encode(data.as_bytes()))
}

#[op2]
#[string]
fn op_atob(#[string] data: &str) -> Result<String, Error> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8 in decoded data: {}", e))
}

deno_core::extension!(
    micro_host,
    ops = [
        op_console_log,
        op_console_warn,
        op_console_error,
        op_sandbox_record,
        op_sandbox_is_active,
        op_crypto_random_uuid,
        op_btoa,
        op_atob,
        op_fetch,
    ],
    esm_entry_point = "ext:micro_host/bootstrap.js",
    esm = ["ext:micro_host/bootstrap.js" = "src/bootstrap.js"],
);
