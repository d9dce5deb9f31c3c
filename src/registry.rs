//! Active app instances by name.

use crate::app::MicroApp;
use crate::error::{MicroAppError, Result};
use indexmap::IndexMap;

#[derive(Debug, Default)]
pub struct AppRegistry {
    apps: IndexMap<String, MicroApp>,
}

impl AppRegistry {
    pub fn get(&self, name: &str) -> Option<MicroApp> {
        self.apps.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apps.contains_key(name)
    }

    /// Registers `app`. A name that is still registered is rejected.
    pub fn insert(&mut self, app: MicroApp) -> Result<()> {
        if self.apps.contains_key(app.name()) {
            return Err(MicroAppError::DuplicateInstanceName(app.name().to_string()));
        }
        self.apps.insert(app.name().to_string(), app);
        Ok(())
    }

    /// Forgets `app`. A different instance registered under the same name
    /// is left alone.
    pub fn remove(&mut self, app: &MicroApp) -> bool {
        if !self.apps.get(app.name()).is_some_and(|current| current.ptr_eq(app)) {
            return false;
        }
        self.apps.shift_remove(app.name());
        true
    }

    pub fn names(&self) -> Vec<String> {
        self.apps.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
