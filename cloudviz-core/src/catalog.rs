use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use cloudviz_model::{AggregatedView, CloudProvider, ExtractionScope, ResultStore};

use crate::aggregator::Aggregator;

/// Identity of an extraction target; a newer store for the same target
/// replaces the older one.
pub type StoreKey = (CloudProvider, Option<ExtractionScope>, Option<String>);

/// Latest completed Result Store per extraction target, plus the view built
/// from all of them.
///
/// Each ingested batch rebuilds the view from scratch; the previous view is
/// never patched.
#[derive(Debug)]
pub struct InventoryCatalog {
    aggregator: Aggregator,
    stores: RwLock<BTreeMap<StoreKey, ResultStore>>,
    view: RwLock<Arc<AggregatedView>>,
}

impl InventoryCatalog {
    pub fn new(aggregator: Aggregator) -> Self {
        let view = AggregatedView::empty(aggregator.currency());
        Self {
            aggregator,
            stores: RwLock::new(BTreeMap::new()),
            view: RwLock::new(Arc::new(view)),
        }
    }

    fn key(store: &ResultStore) -> StoreKey {
        (
            store.provider,
            store.scope,
            store.scope_identifier.clone(),
        )
    }

    /// Add a batch of completed stores and rebuild the view. A store older
    /// than the one already held for its target is ignored.
    pub fn ingest<I>(&self, batch: I) -> Arc<AggregatedView>
    where
        I: IntoIterator<Item = ResultStore>,
    {
        let mut stores = self.stores.write();
        let mut accepted = 0usize;
        for store in batch {
            let key = Self::key(&store);
            let newer = stores
                .get(&key)
                .is_none_or(|held| held.extraction_time <= store.extraction_time);
            if newer {
                stores.insert(key, store);
                accepted += 1;
            }
        }

        let view = Arc::new(self.aggregator.merge(stores.values()));
        *self.view.write() = Arc::clone(&view);
        info!(
            accepted,
            stores = stores.len(),
            resources = view.total_resources,
            "inventory view rebuilt"
        );
        view
    }

    pub fn view(&self) -> Arc<AggregatedView> {
        Arc::clone(&self.view.read())
    }

    pub fn stores(&self) -> Vec<ResultStore> {
        self.stores.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }

    /// Drop every store for `provider` and rebuild.
    pub fn remove_provider(&self, provider: CloudProvider) -> Arc<AggregatedView> {
        let mut stores = self.stores.write();
        stores.retain(|(held, _, _), _| *held != provider);
        let view = Arc::new(self.aggregator.merge(stores.values()));
        *self.view.write() = Arc::clone(&view);
        view
    }
}
