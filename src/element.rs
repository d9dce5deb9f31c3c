//! `<micro-app>` custom element shim.
//!
//! Translates the host's element callbacks into controller calls. The
//! element node itself is the mount container.

use crate::app::MicroApp;
use crate::dom;
use crate::error::{MicroAppError, Result};
use crate::host::MicroHost;
use kuchikiki::NodeRef;

pub const TAG_NAME: &str = "micro-app";

/// Attributes whose changes are delivered to `attribute_changed`.
pub const OBSERVED_ATTRIBUTES: &[&str] = &["name", "url", "destroy"];

#[derive(Debug)]
pub struct MicroAppElement {
    node: NodeRef,
    name: Option<String>,
    url: Option<String>,
    destroy: bool,
    app: Option<MicroApp>,
}

impl MicroAppElement {
    /// Wraps an existing `<micro-app>` node, reading its current attributes.
    pub fn from_node(node: NodeRef) -> Self {
        let non_empty = |name: &str| dom::attribute(&node, name).filter(|value| !value.is_empty());
        Self {
            name: non_empty("name"),
            url: non_empty("url"),
            destroy: dom::attribute(&node, "destroy").is_some(),
            node,
            app: None,
        }
    }

    /// Every `<micro-app>` element in `document`, in tree order.
    pub fn find_all(document: &NodeRef) -> Vec<Self> {
        document
            .inclusive_descendants()
            .filter(|node| dom::is_element(node, TAG_NAME))
            .map(Self::from_node)
            .collect()
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn app(&self) -> Option<&MicroApp> {
        self.app.as_ref()
    }

    /// `None` removes the attribute. `name` and `url` are only honoured
    /// before the element is connected.
    pub fn attribute_changed(&mut self, attribute: &str, value: Option<&str>) {
        if !OBSERVED_ATTRIBUTES.contains(&attribute) {
            return;
        }
        if attribute == "destroy" {
            self.destroy = value.is_some();
            return;
        }
        if self.app.is_some() {
            tracing::warn!(attribute, "ignoring attribute change on a connected micro app");
            return;
        }

        let value = value.filter(|v| !v.is_empty()).map(str::to_string);
        match attribute {
            "name" => self.name = value,
            "url" => self.url = value,
            _ => {}
        }
    }

    /// Element attached to the document: construct and register the app.
    pub fn connected(&mut self, host: &MicroHost) -> Result<MicroApp> {
        if let Some(app) = &self.app {
            return Ok(app.clone());
        }
        let name = self
            .name
            .clone()
            .ok_or_else(|| MicroAppError::InvalidArgument("micro-app element has no name".to_string()))?;
        let url = self
            .url
            .clone()
            .ok_or_else(|| MicroAppError::InvalidArgument(format!("micro-app '{}' has no url", name)))?;

        tracing::debug!(app = %name, "micro-app element connected");
        let app = host.create_app(&name, &url, self.node.clone())?;
        self.app = Some(app.clone());
        Ok(app)
    }

    /// Element removed from the document: unmount, destroying the instance
    /// when the `destroy` attribute is present.
    pub fn disconnected(&mut self) -> Result<()> {
        let Some(app) = self.app.take() else {
            return Ok(());
        };
        tracing::debug!(app = %app.name(), destroy = self.destroy, "micro-app element disconnected");
        app.unmount(self.destroy)
    }
}
