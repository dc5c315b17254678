//! Per application block/permit rules
//!
//! Tracks the filters created for each application path so they can be
//! removed again. Adding a path that is already tracked does nothing.

use super::{DisplayData, DynamicSublayer, FilterAction, Layer, ObjectKey};
use crate::NetResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const APP_FILTER_WEIGHT: u8 = 14;

/// Per application rule set, as used by the split tunnel controller
pub trait AppFilterRules: Send + Sync {
    /// Apply every `(layer, action)` pair to each path not tracked yet
    fn add(&self, paths: &[String], filters: &[(Layer, FilterAction)]) -> NetResult<()>;
    fn remove(&self, path: &str);
    fn remove_all(&self);
}

pub struct AppFilter {
    sublayer: Arc<DynamicSublayer>,
    list: Mutex<HashMap<String, Vec<ObjectKey>>>,
}

impl AppFilter {
    pub fn new(sublayer: Arc<DynamicSublayer>) -> Self {
        Self {
            sublayer,
            list: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracked_paths(&self) -> usize {
        self.list.lock().len()
    }

    pub fn filters_for(&self, path: &str) -> Vec<ObjectKey> {
        self.list.lock().get(path).cloned().unwrap_or_default()
    }

    fn destroy(&self, path: &str, filters: Vec<ObjectKey>) {
        for filter in filters {
            if let Err(e) = self.sublayer.destroy_filter(filter) {
                log::warn!("Failed to remove app filter {} for '{}': {}", filter, path, e);
            }
        }
    }
}

impl AppFilterRules for AppFilter {
    fn add(&self, paths: &[String], filters: &[(Layer, FilterAction)]) -> NetResult<()> {
        let mut list = self.list.lock();

        for path in paths {
            if list.contains_key(path) {
                continue;
            }

            let created = list.entry(path.clone()).or_default();
            for (layer, action) in filters {
                let result = self.sublayer.create_app_filter(
                    DisplayData::new("TunnelCtl app filter", ""),
                    *action,
                    *layer,
                    APP_FILTER_WEIGHT,
                    path,
                    *action == FilterAction::HardPermit,
                );

                match result {
                    Ok(key) => created.push(key),
                    Err(e) if e.is_invalid_argument() => {
                        log::warn!("Skipping {:?} filter for '{}' on {}: {}", action, path, layer, e);
                    }
                    Err(e) => {
                        log::error!("Failed to add {:?} filter for '{}' on {}: {}", action, path, layer, e);
                        return Err(e);
                    }
                }
            }
        }

        Ok(())
    }

    fn remove(&self, path: &str) {
        let removed = self.list.lock().remove(path);
        if let Some(filters) = removed {
            self.destroy(path, filters);
        }
    }

    fn remove_all(&self) {
        let all: Vec<(String, Vec<ObjectKey>)> = self.list.lock().drain().collect();
        for (path, filters) in all {
            self.destroy(&path, filters);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FIREWALL_SUBLAYER_WEIGHT;
    use crate::testing::{FakeFilterEngine, FilterCall};

    fn app_filter(engine: &Arc<FakeFilterEngine>) -> AppFilter {
        let sublayer = DynamicSublayer::open(
            engine.as_ref(),
            &DisplayData::new("test", ""),
            FIREWALL_SUBLAYER_WEIGHT,
        )
        .unwrap();
        AppFilter::new(Arc::new(sublayer))
    }

    fn soft_block() -> Vec<(Layer, FilterAction)> {
        vec![
            (Layer::AppAuthConnectV4, FilterAction::SoftBlock),
            (Layer::AppAuthConnectV6, FilterAction::SoftBlock),
        ]
    }

    fn app_filter_calls(engine: &FakeFilterEngine) -> Vec<FilterCall> {
        engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, FilterCall::AddAppFilter { .. }))
            .collect()
    }

    #[test]
    fn test_add_same_path_twice_is_idempotent() {
        let engine = Arc::new(FakeFilterEngine::new());
        let filter = app_filter(&engine);
        let paths = vec!["C:\\a.exe".to_string()];

        filter.add(&paths, &soft_block()).unwrap();
        filter.add(&paths, &soft_block()).unwrap();

        assert_eq!(filter.tracked_paths(), 1);
        assert_eq!(filter.filters_for("C:\\a.exe").len(), 2);
        assert_eq!(app_filter_calls(&engine).len(), 2);
    }

    #[test]
    fn test_hard_permit_excludes_dns_port() {
        let engine = Arc::new(FakeFilterEngine::new());
        let filter = app_filter(&engine);

        filter
            .add(
                &["C:\\a.exe".to_string()],
                &[
                    (Layer::AppAuthConnectV4, FilterAction::HardPermit),
                    (Layer::AppAuthConnectV6, FilterAction::HardBlock),
                ],
            )
            .unwrap();

        assert_eq!(
            app_filter_calls(&engine),
            vec![
                FilterCall::AddAppFilter {
                    path: "C:\\a.exe".to_string(),
                    layer: Layer::AppAuthConnectV4,
                    action: FilterAction::HardPermit,
                    exclude_dns_port: true,
                },
                FilterCall::AddAppFilter {
                    path: "C:\\a.exe".to_string(),
                    layer: Layer::AppAuthConnectV6,
                    action: FilterAction::HardBlock,
                    exclude_dns_port: false,
                },
            ]
        );
    }

    #[test]
    fn test_invalid_path_does_not_stop_others() {
        let engine = Arc::new(FakeFilterEngine::new().with_invalid_path("bad"));
        let filter = app_filter(&engine);

        filter
            .add(&["bad".to_string(), "C:\\b.exe".to_string()], &soft_block())
            .unwrap();

        assert!(filter.filters_for("bad").is_empty());
        assert_eq!(filter.filters_for("C:\\b.exe").len(), 2);
    }

    #[test]
    fn test_remove_destroys_tracked_filters() {
        let engine = Arc::new(FakeFilterEngine::new());
        let filter = app_filter(&engine);
        filter.add(&["C:\\a.exe".to_string()], &soft_block()).unwrap();
        let keys = filter.filters_for("C:\\a.exe");

        filter.remove("C:\\a.exe");
        filter.remove("C:\\missing.exe");

        let deleted: Vec<ObjectKey> = engine
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                FilterCall::DeleteFilter(key) => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, keys);
        assert_eq!(filter.tracked_paths(), 0);
    }

    #[test]
    fn test_remove_all() {
        let engine = Arc::new(FakeFilterEngine::new());
        let filter = app_filter(&engine);
        filter
            .add(&["C:\\a.exe".to_string(), "C:\\b.exe".to_string()], &soft_block())
            .unwrap();

        filter.remove_all();

        assert_eq!(filter.tracked_paths(), 0);
        let deletes = engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, FilterCall::DeleteFilter(_)))
            .count();
        assert_eq!(deletes, 4);
    }

    #[test]
    fn test_path_can_be_added_again_after_removal() {
        let engine = Arc::new(FakeFilterEngine::new());
        let filter = app_filter(&engine);
        let paths = vec!["C:\\a.exe".to_string()];

        filter.add(&paths, &soft_block()).unwrap();
        filter.remove_all();
        filter.add(&paths, &soft_block()).unwrap();

        assert_eq!(app_filter_calls(&engine).len(), 4);
        assert_eq!(filter.tracked_paths(), 1);
    }
}
