//! Dataset resolution, random item selection and decoding.
//!
//! A [`Collection`] is resolved once per pipeline build and shared read-only
//! between workers; per-sample selection is an index draw into it.

pub mod storage;

pub use storage::{
    normalize_subset, DatasetStorage, FsStorage, ItemRef, MemoryStorage, IMAGE_EXTENSIONS,
};

use crate::config::DatasetRef;
use crate::error::{DatasetError, ItemLoadError, LoadCause};
use crate::frame::Frame;
use log::{debug, info};
use rand::{Rng, RngCore};
use shared::image_proc::dynamic_image_to_array3;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

/// Immutable, shared list of items.
#[derive(Debug, Clone)]
pub struct Collection {
    items: Arc<[ItemRef]>,
}

impl Collection {
    pub fn new(items: Vec<ItemRef>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Uniform draw with replacement. `None` only for an empty collection.
    pub fn pick(&self, rng: &mut dyn RngCore) -> Option<&ItemRef> {
        if self.items.is_empty() {
            return None;
        }
        self.items.get(rng.gen_range(0..self.items.len()))
    }
}

impl Deref for Collection {
    type Target = [ItemRef];

    fn deref(&self) -> &[ItemRef] {
        &self.items
    }
}

/// Resolves dataset references against a storage backend and loads items.
#[derive(Debug, Clone)]
pub struct DatasetRegistry {
    storage: Arc<dyn DatasetStorage>,
}

impl DatasetRegistry {
    pub fn new(storage: Arc<dyn DatasetStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn DatasetStorage> {
        &self.storage
    }

    /// All items under `subsets` of `dataset`, in subset order without duplicates.
    ///
    /// An empty subset list selects the whole dataset. An empty result is an error.
    pub fn resolve(&self, dataset: &str, subsets: &[String]) -> Result<Collection, DatasetError> {
        let mut seen = HashSet::new();
        let items = self.collect(dataset, subsets, &mut seen)?;
        if items.is_empty() {
            return Err(empty(dataset, subsets));
        }
        info!(
            "Resolved {} items from dataset '{}' {:?}",
            items.len(),
            dataset,
            subsets
        );
        Ok(Collection::new(items))
    }

    /// Concatenate the collections of several references.
    pub fn resolve_all(&self, refs: &[DatasetRef]) -> Result<Collection, DatasetError> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for dataset_ref in refs {
            let found = self.collect(&dataset_ref.name, &dataset_ref.subsets, &mut seen)?;
            info!(
                "Resolved {} items from dataset '{}' {:?}",
                found.len(),
                dataset_ref.name,
                dataset_ref.subsets
            );
            items.extend(found);
        }
        if items.is_empty() {
            let names = refs.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join("+");
            let subsets: Vec<String> = refs.iter().flat_map(|r| r.subsets.clone()).collect();
            return Err(empty(&names, &subsets));
        }
        Ok(Collection::new(items))
    }

    fn collect(
        &self,
        dataset: &str,
        subsets: &[String],
        seen: &mut HashSet<ItemRef>,
    ) -> Result<Vec<ItemRef>, DatasetError> {
        if !self.storage.has_dataset(dataset) {
            return Err(DatasetError::DatasetNotFound {
                name: dataset.to_string(),
            });
        }

        let whole = [String::new()];
        let subsets = if subsets.is_empty() { &whole[..] } else { subsets };

        let mut items = Vec::new();
        for subset in subsets {
            let listed = self.storage.list(dataset, subset)?;
            debug!("Subset '{}/{}' has {} items", dataset, subset, listed.len());
            items.extend(listed.into_iter().filter(|item| seen.insert(item.clone())));
        }
        Ok(items)
    }

    /// Uniform draw with replacement.
    pub fn pick<'c>(&self, collection: &'c Collection, rng: &mut dyn RngCore) -> Option<&'c ItemRef> {
        collection.pick(rng)
    }

    /// Read and decode one item.
    pub fn load(&self, item: &ItemRef) -> Result<Frame, ItemLoadError> {
        let wrap = |source: LoadCause| ItemLoadError {
            item: item.to_string(),
            source,
        };
        let bytes = self.storage.read(item).map_err(|e| wrap(e.into()))?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| wrap(e.into()))?;
        let pixels = dynamic_image_to_array3(&decoded).map_err(|e| wrap(e.into()))?;
        Ok(Frame::from(pixels))
    }
}

fn empty(dataset: &str, subsets: &[String]) -> DatasetError {
    DatasetError::EmptyCollection {
        dataset: dataset.to_string(),
        subsets: subsets.to_vec(),
    }
}
