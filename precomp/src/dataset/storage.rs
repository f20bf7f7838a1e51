//! Storage backends that list and read dataset items.

use crate::error::DatasetError;
use image::{DynamicImage, ImageOutputFormat};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// File extensions listed by [`FsStorage`].
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// One item of a dataset: the dataset name and a `/`-separated path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemRef {
    pub dataset: String,
    pub path: String,
}

impl ItemRef {
    pub fn new(dataset: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dataset, self.path)
    }
}

/// Where dataset items live.
///
/// `list` enumerates every item below a subset path, recursively and in a
/// stable order. An empty subset is the whole dataset.
pub trait DatasetStorage: Send + Sync + fmt::Debug {
    fn has_dataset(&self, dataset: &str) -> bool;

    fn list(&self, dataset: &str, subset: &str) -> Result<Vec<ItemRef>, DatasetError>;

    fn read(&self, item: &ItemRef) -> io::Result<Vec<u8>>;
}

/// Normalize a subset path to `a/b/c` form. `None` if it escapes the dataset.
pub fn normalize_subset(subset: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(subset).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Datasets stored as directories under a root: `<root>/<dataset>/<subset>/...`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root_path: PathBuf,
}

impl FsStorage {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn dataset_dir(&self, dataset: &str) -> Option<PathBuf> {
        let name = normalize_subset(dataset).filter(|n| !n.is_empty() && !n.contains('/'))?;
        Some(self.root_path.join(name))
    }

    fn collect_images(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect_images(&path, files)?;
            } else if has_image_extension(&path) {
                files.push(path);
            }
        }
        Ok(())
    }
}

impl DatasetStorage for FsStorage {
    fn has_dataset(&self, dataset: &str) -> bool {
        self.dataset_dir(dataset).is_some_and(|dir| dir.is_dir())
    }

    fn list(&self, dataset: &str, subset: &str) -> Result<Vec<ItemRef>, DatasetError> {
        let not_found = || DatasetError::SubsetNotFound {
            dataset: dataset.to_string(),
            subset: subset.to_string(),
        };
        let dataset_dir = self
            .dataset_dir(dataset)
            .ok_or_else(|| DatasetError::DatasetNotFound {
                name: dataset.to_string(),
            })?;
        let relative = normalize_subset(subset).ok_or_else(not_found)?;
        let dir = dataset_dir.join(&relative);
        if !dir.is_dir() {
            return Err(not_found());
        }

        let mut files = Vec::new();
        Self::collect_images(&dir, &mut files).map_err(|source| DatasetError::Io {
            dataset: dataset.to_string(),
            source,
        })?;
        files.sort();

        Ok(files
            .iter()
            .filter_map(|file| {
                let rel = file.strip_prefix(&dataset_dir).ok()?;
                let key: Vec<&str> = rel.iter().map(|p| p.to_str()).collect::<Option<_>>()?;
                Some(ItemRef::new(dataset, key.join("/")))
            })
            .collect())
    }

    fn read(&self, item: &ItemRef) -> io::Result<Vec<u8>> {
        let relative = normalize_subset(&item.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path escapes dataset"))?;
        let dir = self
            .dataset_dir(&item.dataset)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown dataset"))?;
        std::fs::read(dir.join(relative))
    }
}

/// In-process datasets, for synthetic data and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    datasets: BTreeMap<String, BTreeMap<String, Arc<Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty dataset.
    pub fn add_dataset(&mut self, dataset: &str) {
        self.datasets.entry(dataset.to_string()).or_default();
    }

    pub fn insert_bytes(&mut self, dataset: &str, path: &str, bytes: Vec<u8>) {
        let key = normalize_subset(path).unwrap_or_else(|| path.to_string());
        self.datasets
            .entry(dataset.to_string())
            .or_default()
            .insert(key, Arc::new(bytes));
    }

    /// Store an image encoded as PNG.
    pub fn insert_image(
        &mut self,
        dataset: &str,
        path: &str,
        image: &DynamicImage,
    ) -> Result<(), image::ImageError> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageOutputFormat::Png)?;
        self.insert_bytes(dataset, path, buffer.into_inner());
        Ok(())
    }

    pub fn len(&self, dataset: &str) -> usize {
        self.datasets.get(dataset).map_or(0, |items| items.len())
    }
}

impl DatasetStorage for MemoryStorage {
    fn has_dataset(&self, dataset: &str) -> bool {
        self.datasets.contains_key(dataset)
    }

    fn list(&self, dataset: &str, subset: &str) -> Result<Vec<ItemRef>, DatasetError> {
        let items = self
            .datasets
            .get(dataset)
            .ok_or_else(|| DatasetError::DatasetNotFound {
                name: dataset.to_string(),
            })?;
        let not_found = || DatasetError::SubsetNotFound {
            dataset: dataset.to_string(),
            subset: subset.to_string(),
        };
        let prefix = normalize_subset(subset).ok_or_else(not_found)?;

        let listed: Vec<ItemRef> = items
            .keys()
            .filter(|key| {
                prefix.is_empty()
                    || key
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|key| ItemRef::new(dataset, key.clone()))
            .collect();

        // Subsets exist only through their items; a whole empty dataset is still listable
        if listed.is_empty() && !prefix.is_empty() {
            return Err(not_found());
        }
        Ok(listed)
    }

    fn read(&self, item: &ItemRef) -> io::Result<Vec<u8>> {
        self.datasets
            .get(&item.dataset)
            .and_then(|items| items.get(&item.path))
            .map(|bytes| bytes.as_ref().clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, item.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_normalize_subset() {
        assert_eq!(normalize_subset("Images/Icons/").as_deref(), Some("Images/Icons"));
        assert_eq!(normalize_subset("./PSFs").as_deref(), Some("PSFs"));
        assert_eq!(normalize_subset("").as_deref(), Some(""));
        assert_eq!(normalize_subset("../secrets"), None);
    }

    #[test]
    fn test_fs_listing_is_recursive_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "SCA2023/Images/Texts/b.png");
        touch(root, "SCA2023/Images/Icons/z.PNG");
        touch(root, "SCA2023/Images/Icons/a.jpg");
        touch(root, "SCA2023/Images/Icons/notes.txt");
        touch(root, "SCA2023/PSFs/Narrow/psf0.tiff");

        let storage = FsStorage::new(root);
        assert!(storage.has_dataset("SCA2023"));
        assert!(!storage.has_dataset("CVD"));

        let items = storage.list("SCA2023", "Images").unwrap();
        let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            ["Images/Icons/a.jpg", "Images/Icons/z.PNG", "Images/Texts/b.png"]
        );

        assert_eq!(storage.list("SCA2023", "").unwrap().len(), 4);
        assert_eq!(storage.read(&items[0]).unwrap(), b"x");
    }

    #[test]
    fn test_fs_missing_subset_and_dataset() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "SCA2023/Images/a.png");
        let storage = FsStorage::new(dir.path());

        assert!(matches!(
            storage.list("SCA2023", "PSFs/Broad"),
            Err(DatasetError::SubsetNotFound { .. })
        ));
        assert!(matches!(
            storage.list("SCA2023", "../SCA2023"),
            Err(DatasetError::SubsetNotFound { .. })
        ));
        assert!(storage.read(&ItemRef::new("SCA2023", "Images/missing.png")).is_err());
    }

    #[test]
    fn test_memory_storage_prefix_listing() {
        let mut storage = MemoryStorage::new();
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([9])));
        storage.insert_image("mem", "Images/Icons/a.png", &img).unwrap();
        storage.insert_bytes("mem", "Images/Iconsx/b.png", vec![1, 2, 3]);
        storage.insert_bytes("mem", "PSFs/p.png", vec![4]);

        let icons = storage.list("mem", "Images/Icons").unwrap();
        assert_eq!(icons, vec![ItemRef::new("mem", "Images/Icons/a.png")]);
        assert_eq!(storage.list("mem", "").unwrap().len(), 3);
        assert!(matches!(
            storage.list("mem", "Texts"),
            Err(DatasetError::SubsetNotFound { .. })
        ));
        assert!(matches!(
            storage.list("other", ""),
            Err(DatasetError::DatasetNotFound { .. })
        ));
        assert_eq!(storage.read(&ItemRef::new("mem", "PSFs/p.png")).unwrap(), vec![4]);
    }
}
