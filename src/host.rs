//! The embedding entry point: one script runtime, one registry, many apps.

use crate::app::{AppEnv, MicroApp};
use crate::config::HostConfig;
use crate::error::{MicroAppError, Result};
use crate::events::{EventSink, LifecycleEvent};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::ops::ConsoleOutput;
use crate::registry::AppRegistry;
use crate::runtime::ScriptRuntime;
use kuchikiki::NodeRef;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct MicroHost {
    config: HostConfig,
    runtime: ScriptRuntime,
    fetcher: Rc<dyn Fetcher>,
    registry: Rc<RefCell<AppRegistry>>,
    events: EventSink,
}

impl MicroHost {
    pub fn new(config: HostConfig, fetcher: Rc<dyn Fetcher>) -> Self {
        let runtime = ScriptRuntime::new(&config);
        Self {
            config,
            runtime,
            fetcher,
            registry: Rc::new(RefCell::new(AppRegistry::default())),
            events: EventSink::default(),
        }
    }

    /// Host fetching over HTTP with the configured timeout.
    pub fn with_http(config: HostConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.fetch_timeout_ms)
            .map_err(|e| MicroAppError::Config(e.to_string()))?;
        Ok(Self::new(config, Rc::new(fetcher)))
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    pub fn subscribe(&self) -> UnboundedReceiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Constructs and registers an app mounted into `container`.
    ///
    /// Must be called inside a `LocalSet`. A name that is still registered
    /// is rejected before anything is constructed.
    pub fn create_app(&self, name: &str, url: &str, container: NodeRef) -> Result<MicroApp> {
        if self.registry.borrow().contains(name) {
            return Err(MicroAppError::DuplicateInstanceName(name.to_string()));
        }

        let env = AppEnv {
            runtime: self.runtime.clone(),
            fetcher: self.fetcher.clone(),
            registry: Rc::downgrade(&self.registry),
            events: self.events.clone(),
        };
        let app = MicroApp::construct(name, url, container, env)?;
        self.registry.borrow_mut().insert(app.clone())?;
        Ok(app)
    }

    pub fn app(&self, name: &str) -> Option<MicroApp> {
        self.registry.borrow().get(name)
    }

    pub fn app_names(&self) -> Vec<String> {
        self.registry.borrow().names()
    }

    /// Unmounts a registered app. Returns `false` when no app has that name.
    pub fn unmount(&self, name: &str, destroy: bool) -> Result<bool> {
        let Some(app) = self.app(name) else {
            return Ok(false);
        };
        app.unmount(destroy)?;
        Ok(true)
    }

    pub async fn run_event_loop(&self) -> Result<()> {
        self.runtime.run_event_loop().await
    }

    pub fn console(&self) -> ConsoleOutput {
        self.runtime.console()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppStatus;
    use crate::dom;
    use crate::fetch::MemoryFetcher;
    use serde_json::json;
    use tokio::task::LocalSet;

    const APP_URL: &str = "http://localhost:3000/";

    fn host(fetcher: MemoryFetcher) -> MicroHost {
        MicroHost::new(HostConfig::default(), Rc::new(fetcher))
    }

    #[tokio::test]
    async fn test_mount_then_destroy() {
        LocalSet::new()
            .run_until(async {
                let host = host(MemoryFetcher::new().with(
                    APP_URL,
                    "<html><head><title>m</title></head><body><p>marker</p><script>window.__marker = 42</script></body></html>",
                ));
                let container = dom::new_element("div");

                let app = host.create_app("marker", APP_URL, container.clone()).unwrap();
                app.settled().await;

                assert_eq!(app.status(), AppStatus::Mounted);
                assert_eq!(app.sandbox().read("__marker").unwrap().data(), Some(&json!(42)));
                assert!(dom::find_element(&container, "micro-app-body").is_some());

                assert!(host.unmount("marker", true).unwrap());
                assert!(host.app("marker").is_none());
                assert_eq!(app.status(), AppStatus::Unmounted);
                assert!(!app.sandbox().own_keys().unwrap().contains(&"__marker".to_string()));
                assert!(app.sandbox().read("__marker").unwrap().is_undefined());
            })
            .await;
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        LocalSet::new()
            .run_until(async {
                let host = host(MemoryFetcher::new().with(APP_URL, "<p>a</p>"));

                let first = host.create_app("dup", APP_URL, dom::new_element("div")).unwrap();
                let err = host
                    .create_app("dup", APP_URL, dom::new_element("div"))
                    .unwrap_err();
                assert!(matches!(err, MicroAppError::DuplicateInstanceName(ref name) if name == "dup"));
                assert_eq!(host.app_names(), vec!["dup"]);

                // Unmount without destroy keeps the name taken.
                first.unmount(false).unwrap();
                assert!(host.create_app("dup", APP_URL, dom::new_element("div")).is_err());

                first.unmount(true).unwrap();
                let second = host.create_app("dup", APP_URL, dom::new_element("div")).unwrap();
                second.settled().await;
                assert_eq!(second.status(), AppStatus::Mounted);
            })
            .await;
    }

    #[tokio::test]
    async fn test_stale_handle_does_not_evict_new_instance() {
        LocalSet::new()
            .run_until(async {
                let host = host(MemoryFetcher::new().with(APP_URL, "<p>a</p>"));

                let first = host.create_app("dup", APP_URL, dom::new_element("div")).unwrap();
                first.settled().await;
                first.unmount(true).unwrap();

                let second = host.create_app("dup", APP_URL, dom::new_element("div")).unwrap();
                second.settled().await;
                first.unmount(true).unwrap();

                assert_eq!(second.status(), AppStatus::Mounted);
                assert!(host.app("dup").is_some_and(|app| app.ptr_eq(&second)));
                assert!(matches!(
                    host.create_app("dup", APP_URL, dom::new_element("div")),
                    Err(MicroAppError::DuplicateInstanceName(_))
                ));
            })
            .await;
    }

    #[tokio::test]
    async fn test_destroy_frees_name_after_defined_property() {
        LocalSet::new()
            .run_until(async {
                let host = host(MemoryFetcher::new().with(
                    APP_URL,
                    "<p>pinned</p><script>Object.defineProperty(window, 'pinned', { value: 7 })</script>",
                ));
                let mut events = host.subscribe();

                let app = host.create_app("pinned", APP_URL, dom::new_element("div")).unwrap();
                app.settled().await;
                assert_eq!(app.sandbox().read("pinned").unwrap().data(), Some(&json!(7)));

                assert!(host.unmount("pinned", true).unwrap());
                assert!(host.app("pinned").is_none());
                assert!(app.sandbox().own_keys().unwrap().is_empty());

                let mut destroyed = false;
                while let Ok(event) = events.try_recv() {
                    destroyed |= matches!(event, LifecycleEvent::Unmounted { destroyed: true, .. });
                }
                assert!(destroyed);
            })
            .await;
    }

    #[tokio::test]
    async fn test_styles_land_in_renamed_head() {
        LocalSet::new()
            .run_until(async {
                let host = host(
                    MemoryFetcher::new()
                        .with(
                            APP_URL,
                            r#"<head><link rel="stylesheet" href="a.css"><link rel="stylesheet" href="/b.css"></head><body><p>styled</p></body>"#,
                        )
                        .with("http://localhost:3000/a.css", "p { color: red }")
                        .with("http://localhost:3000/b.css", "p { margin: 0 }"),
                );
                let container = dom::new_element("div");

                let app = host.create_app("styled", APP_URL, container.clone()).unwrap();
                app.settled().await;

                let source = app.source();
                assert_eq!(source.links["a.css"].code, "p { color: red }");
                assert_eq!(source.links["/b.css"].code, "p { margin: 0 }");

                let head = dom::find_element(&container, "micro-app-head").unwrap();
                assert_eq!(
                    dom::inner_html(&head),
                    "<style>p { color: red }</style><style>p { margin: 0 }</style>"
                );
            })
            .await;
    }

    #[tokio::test]
    async fn test_apps_are_isolated_from_each_other_and_the_host() {
        LocalSet::new()
            .run_until(async {
                let host = host(
                    MemoryFetcher::new()
                        .with("http://one.test/", "<script>window.name = 'one'; counter = 1</script>")
                        .with("http://two.test/", "<script>window.name = 'two'</script>"),
                );

                let one = host.create_app("one", "http://one.test/", dom::new_element("div")).unwrap();
                let two = host.create_app("two", "http://two.test/", dom::new_element("div")).unwrap();
                one.settled().await;
                two.settled().await;

                assert_eq!(one.sandbox().read("name").unwrap().data(), Some(&json!("one")));
                assert_eq!(two.sandbox().read("name").unwrap().data(), Some(&json!("two")));
                assert!(two.sandbox().read("counter").unwrap().is_undefined());

                let leaked: String = host
                    .runtime()
                    .eval_json("JSON.stringify(typeof globalThis.counter)".to_string())
                    .unwrap();
                assert_eq!(leaked, "undefined");
            })
            .await;
    }
}
