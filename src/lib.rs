//! # Micro Host
//!
//! A headless host for micro-frontends: each `<micro-app>` element loads an
//! independently served HTML/CSS/JS bundle from a URL, mounts its markup
//! into the element and runs its scripts inside a per-app sandbox on a
//! shared `deno_core` isolate.
//!
//! ## Lifecycle
//!
//! - **loading**: the document is fetched, `head`/`body` are renamed, and
//!   `link`/`script` tags are extracted into a [`SourceSet`]. Stylesheets
//!   and scripts are then fetched as two concurrent phases.
//! - **mounted**: once both phases have signalled, the markup is copied into
//!   the container and the scripts run, in document order, inside the
//!   app's [`Sandbox`].
//! - **unmounted**: the container is released and every global the scripts
//!   injected is removed. With `destroy`, the registry forgets the app.
//!
//! ## Isolation
//!
//! - Scripts read host globals (`console`, `atob`, builtins) through their
//!   sandbox; plain host functions come back bound to the host global
//! - Writes to `window`, `self`, `globalThis`, `this` or bare identifiers
//!   stay in the sandbox and are only accepted while it is active
//! - Script `fetch()` only reaches origins in [`HostConfig::allowed_origins`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use micro_host::{dom, HostConfig, MicroHost};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let local = tokio::task::LocalSet::new();
//!     local.run_until(async {
//!         let host = MicroHost::with_http(HostConfig::default()).unwrap();
//!         let container = dom::new_element("div");
//!         let app = host.create_app("app", "http://localhost:3000/", container.clone()).unwrap();
//!         app.settled().await;
//!         println!("{}", dom::inner_html(&container));
//!     }).await;
//! }
//! ```

mod app;
mod config;
pub mod dom;
mod element;
mod error;
mod events;
mod fetch;
mod host;
mod loader;
mod ops;
mod registry;
mod runtime;
mod sandbox;
mod source;

pub use app::{AppStatus, MicroApp};
pub use config::HostConfig;
pub use element::{MicroAppElement, OBSERVED_ATTRIBUTES, TAG_NAME};
pub use error::{MicroAppError, Result};
pub use events::{LifecycleEvent, LoadPhase};
pub use fetch::{FetchError, Fetcher, HttpFetcher, MemoryFetcher};
pub use host::MicroHost;
pub use loader::{extract_source_dom, rewrite_singleton_tags};
pub use ops::ConsoleOutput;
pub use registry::AppRegistry;
pub use runtime::ScriptRuntime;
pub use sandbox::{Sandbox, SandboxState, ScopeValue};
pub use source::{LinkSource, ScriptSource, SourceSet};
