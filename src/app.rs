//! One micro-app's lifecycle.
//!
//! `created → loading → mounted → unmounted`. Loading starts at
//! construction; mounting happens once both load phases have signalled and
//! only while the app is still loading; `unmounted` is terminal and may be
//! reached from `loading` (teardown race) or `mounted`.

use crate::dom;
use crate::error::{MicroAppError, Result};
use crate::events::{EventSink, LifecycleEvent, LoadPhase};
use crate::fetch::Fetcher;
use crate::loader;
use crate::registry::AppRegistry;
use crate::runtime::ScriptRuntime;
use crate::sandbox::Sandbox;
use crate::source::SourceSet;
use kuchikiki::NodeRef;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tokio::task::JoinHandle;
use url::Url;

/// Link phase + script phase.
const LOAD_TARGET: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    Created,
    Loading,
    Mounted,
    Unmounted,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppStatus::Created => "created",
            AppStatus::Loading => "loading",
            AppStatus::Mounted => "mounted",
            AppStatus::Unmounted => "unmounted",
        };
        f.write_str(name)
    }
}

/// What an app borrows from its host.
#[derive(Clone)]
pub(crate) struct AppEnv {
    pub runtime: ScriptRuntime,
    pub fetcher: Rc<dyn Fetcher>,
    pub registry: Weak<RefCell<AppRegistry>>,
    pub events: EventSink,
}

struct AppState {
    status: AppStatus,
    container: Option<NodeRef>,
    source: SourceSet,
    load_count: u8,
    fragment: Option<NodeRef>,
    load_error: Option<MicroAppError>,
    loader: Option<JoinHandle<()>>,
}

struct AppInner {
    name: String,
    url: String,
    base: Url,
    env: AppEnv,
    sandbox: Sandbox,
    state: RefCell<AppState>,
}

/// Handle to a micro-app controller. Clones share the same app.
#[derive(Clone)]
pub struct MicroApp {
    inner: Rc<AppInner>,
}

impl MicroApp {
    /// Validates the arguments, creates the sandbox and starts loading.
    ///
    /// The loader is spawned with `tokio::task::spawn_local`, so this must
    /// run inside a `LocalSet`.
    pub(crate) fn construct(name: &str, url: &str, container: NodeRef, env: AppEnv) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(MicroAppError::InvalidArgument("app name is empty".to_string()));
        }
        if url.trim().is_empty() {
            return Err(MicroAppError::InvalidArgument(format!("app '{}' has no url", name)));
        }
        let base = Url::parse(url)
            .map_err(|e| MicroAppError::InvalidArgument(format!("invalid url '{}': {}", url, e)))?;

        let sandbox = Sandbox::new(&env.runtime)?;
        let app = Self {
            inner: Rc::new(AppInner {
                name: name.to_string(),
                url: url.to_string(),
                base,
                env,
                sandbox,
                state: RefCell::new(AppState {
                    status: AppStatus::Created,
                    container: Some(container),
                    source: SourceSet::default(),
                    load_count: 0,
                    fragment: None,
                    load_error: None,
                    loader: None,
                }),
            }),
        };

        app.inner.state.borrow_mut().status = AppStatus::Loading;
        tracing::info!(app = %app.name(), url = %app.url(), "loading micro app");
        app.emit(LifecycleEvent::Loading {
            app: app.name().to_string(),
            url: app.url().to_string(),
        });

        let handle = tokio::task::spawn_local(loader::load_html(app.clone()));
        app.inner.state.borrow_mut().loader = Some(handle);
        Ok(app)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn status(&self) -> AppStatus {
        self.inner.state.borrow().status
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.inner.sandbox
    }

    pub fn container(&self) -> Option<NodeRef> {
        self.inner.state.borrow().container.clone()
    }

    /// Snapshot of the extracted resources.
    pub fn source(&self) -> SourceSet {
        self.inner.state.borrow().source.clone()
    }

    /// Number of load phases that have signalled so far.
    pub fn loaded_phases(&self) -> u8 {
        self.inner.state.borrow().load_count
    }

    pub fn load_error(&self) -> Option<MicroAppError> {
        self.inner.state.borrow().load_error.clone()
    }

    /// Waits until the loader task has finished, whatever its outcome.
    pub async fn settled(&self) {
        let handle = self.inner.state.borrow_mut().loader.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(app = %self.name(), error = %e, "loader task failed");
            }
        }
    }

    pub(crate) fn fetcher(&self) -> Rc<dyn Fetcher> {
        self.inner.env.fetcher.clone()
    }

    pub(crate) fn with_source<R>(&self, f: impl FnOnce(&mut SourceSet) -> R) -> R {
        f(&mut self.inner.state.borrow_mut().source)
    }

    /// Resolves a resource reference against the app URL.
    pub(crate) fn resolve(&self, reference: &str) -> Result<String> {
        self.inner
            .base
            .join(reference)
            .map(String::from)
            .map_err(|e| MicroAppError::InvalidArgument(format!("invalid resource url '{}': {}", reference, e)))
    }

    fn emit(&self, event: LifecycleEvent) {
        self.inner.env.events.emit(event);
    }

    /// Records a load failure. The app stays in `loading` and never mounts.
    pub(crate) fn fail(&self, error: MicroAppError) {
        tracing::error!(app = %self.name(), error = %error, "micro app failed to load");
        {
            let mut state = self.inner.state.borrow_mut();
            if state.load_error.is_none() {
                state.load_error = Some(error.clone());
            }
        }
        self.emit(LifecycleEvent::LoadFailed {
            app: self.name().to_string(),
            error,
        });
    }

    /// Counts one completed load phase; the second one mounts the app
    /// unless it was unmounted in the meantime.
    pub fn on_phase_complete(&self, phase: LoadPhase, fragment: NodeRef) {
        let ready = {
            let mut state = self.inner.state.borrow_mut();
            state.load_count += 1;
            state.fragment = Some(fragment);
            state.load_count == LOAD_TARGET && state.status == AppStatus::Loading
        };
        tracing::debug!(app = %self.name(), ?phase, "load phase complete");
        self.emit(LifecycleEvent::PhaseComplete {
            app: self.name().to_string(),
            phase,
        });

        if ready {
            self.mount();
        }
    }

    /// Copies the loaded fragment into the container and runs the scripts
    /// inside the sandbox, in the order they appeared in the document.
    ///
    /// Returns `false` without side effects unless both load phases are
    /// complete and the app is still loading.
    pub fn mount(&self) -> bool {
        let (container, fragment, scripts) = {
            let state = self.inner.state.borrow();
            if state.status != AppStatus::Loading || state.load_count < LOAD_TARGET {
                return false;
            }
            let (Some(container), Some(fragment)) = (state.container.clone(), state.fragment.clone()) else {
                return false;
            };
            let scripts: Vec<(String, String)> = state
                .source
                .scripts
                .iter()
                .map(|(key, script)| (key.clone(), script.code.clone()))
                .collect();
            (container, fragment, scripts)
        };

        let carrier = dom::new_element("div");
        for child in fragment.children() {
            if let Some(copy) = dom::deep_clone(&child) {
                carrier.append(copy);
            }
        }
        for child in carrier.children().collect::<Vec<_>>() {
            container.append(child);
        }

        self.inner.sandbox.start();
        for (key, code) in &scripts {
            // A throwing script only aborts itself.
            if let Err(e) = self.inner.sandbox.execute(code) {
                tracing::warn!(app = %self.name(), script = %key, error = %e, "micro app script threw");
            }
        }

        self.inner.state.borrow_mut().status = AppStatus::Mounted;
        tracing::info!(app = %self.name(), scripts = scripts.len(), "micro app mounted");
        self.emit(LifecycleEvent::Mounted {
            app: self.name().to_string(),
        });
        true
    }

    /// Releases the container and reverts everything the scripts injected.
    /// With `destroy`, the registry also forgets the app.
    pub fn unmount(&self, destroy: bool) -> Result<()> {
        let previous = {
            let mut state = self.inner.state.borrow_mut();
            let previous = state.status;
            state.status = AppStatus::Unmounted;
            state.container = None;
            if destroy {
                state.fragment = None;
            }
            previous
        };

        let stopped = self.inner.sandbox.stop();
        if let Err(error) = &stopped {
            tracing::error!(app = %self.name(), %error, "sandbox teardown failed");
        }

        if destroy {
            if let Some(registry) = self.inner.env.registry.upgrade() {
                registry.borrow_mut().remove(self);
            }
        }

        tracing::info!(app = %self.name(), from = %previous, destroy, "micro app unmounted");
        self.emit(LifecycleEvent::Unmounted {
            app: self.name().to_string(),
            destroyed: destroy,
        });
        stopped
    }

    /// Whether both handles refer to the same app instance.
    pub fn ptr_eq(&self, other: &MicroApp) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MicroApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroApp")
            .field("name", &self.inner.name)
            .field("url", &self.inner.url)
            .field("status", &self.status())
            .finish()
    }
}
