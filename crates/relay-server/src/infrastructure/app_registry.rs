//! Application registry backed by the `[[apps]]` configuration tables.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::{AppId, Application};

use crate::application::ports::AppRegistry;

/// Immutable lookup tables built once at startup.
#[derive(Debug, Default)]
pub struct ConfigAppRegistry {
    by_id: HashMap<AppId, Arc<Application>>,
    by_key: HashMap<String, Arc<Application>>,
}

impl ConfigAppRegistry {
    /// Indexes `apps` by id and by key.  Later duplicates replace earlier
    /// ones; configuration validation rejects duplicates beforehand.
    pub fn new(apps: impl IntoIterator<Item = Application>) -> Self {
        let mut registry = Self::default();
        for app in apps {
            let app = Arc::new(app);
            registry.by_key.insert(app.key.clone(), Arc::clone(&app));
            registry.by_id.insert(app.id.clone(), app);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl AppRegistry for ConfigAppRegistry {
    fn resolve(&self, app_id: &AppId) -> Option<Arc<Application>> {
        self.by_id.get(app_id).cloned()
    }

    fn resolve_by_key(&self, key: &str) -> Option<Arc<Application>> {
        self.by_key.get(key).cloned()
    }

    fn all(&self) -> Vec<Arc<Application>> {
        let mut apps: Vec<_> = self.by_id.values().cloned().collect();
        apps.sort_by(|a, b| a.id.cmp(&b.id));
        apps
    }
}
