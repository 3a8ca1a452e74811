use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{Observation, Product, SelectorDescriptor};

pub type Catalog = BTreeMap<String, Product>;

/// Persistence collaborator for the price history.
pub trait ProductStore: Send + Sync {
    fn load(&self) -> Result<Catalog, StoreError>;
    fn save(&self, products: &Catalog) -> Result<(), StoreError>;

    /// Exclusive across processes for as long as the guard lives. Stores
    /// with a single writer can keep the default.
    fn lock(&self) -> Result<StoreGuard, StoreError> {
        Ok(StoreGuard(None))
    }
}

/// Releases the store lock on drop.
pub struct StoreGuard(Option<File>);

impl Drop for StoreGuard {
    fn drop(&mut self) {
        if let Some(file) = self.0.take() {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::warn!("failed to release store lock: {}", e);
            }
        }
    }
}

/// On-disk shape of one product; the name is the key of the outer object.
#[derive(Serialize, Deserialize)]
struct ProductRecord {
    url: String,
    #[serde(flatten)]
    selector: SelectorDescriptor,
    prices: Vec<Observation>,
}

/// Whole catalog as one pretty-printed JSON object keyed by product name.
/// Writes go to a sibling temp file and are renamed into place; a sibling
/// `.lock` file serialises writers across processes.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }
}

impl ProductStore for JsonFileStore {
    fn load(&self) -> Result<Catalog, StoreError> {
        if !self.path.exists() {
            return Ok(Catalog::new());
        }
        let json = std::fs::read_to_string(&self.path)?;
        let records: BTreeMap<String, ProductRecord> = serde_json::from_str(&json)?;
        Ok(records
            .into_iter()
            .map(|(name, r)| {
                let product = Product {
                    name: name.clone(),
                    url: r.url,
                    selector: r.selector,
                    price_history: r.prices,
                };
                (name, product)
            })
            .collect())
    }

    fn save(&self, products: &Catalog) -> Result<(), StoreError> {
        let records: BTreeMap<&str, ProductRecord> = products
            .iter()
            .map(|(name, p)| {
                let record = ProductRecord {
                    url: p.url.clone(),
                    selector: p.selector.clone(),
                    prices: p.price_history.clone(),
                };
                (name.as_str(), record)
            })
            .collect();
        let json = serde_json::to_string_pretty(&records)?;

        let tmp = self.sibling(".tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> Result<StoreGuard, StoreError> {
        let file = open_lock_file(&self.sibling(".lock"))?;
        file.lock_exclusive()?;
        Ok(StoreGuard(Some(file)))
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
}

/// Price history keyed by product name. Reads come from an in-memory copy;
/// every mutation reloads the store under its lock, applies the change and
/// saves, so writers in other processes are never overwritten.
pub struct PriceHistory {
    products: Mutex<Catalog>,
    store: Box<dyn ProductStore>,
}

impl PriceHistory {
    pub fn open(store: Box<dyn ProductStore>) -> Result<Self, StoreError> {
        let products = store.load()?;
        tracing::debug!("loaded {} products", products.len());
        Ok(Self {
            products: Mutex::new(products),
            store,
        })
    }

    pub fn get(&self, name: &str) -> Option<Product> {
        self.products.lock().get(name).cloned()
    }

    pub fn all(&self) -> Vec<Product> {
        self.products.lock().values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.products.lock().keys().cloned().collect()
    }

    /// Picks up changes other processes wrote since the last load.
    pub fn reload(&self) -> Result<(), StoreError> {
        let mut products = self.products.lock();
        let _guard = self.store.lock()?;
        *products = self.store.load()?;
        Ok(())
    }

    /// Inserts a new product. Returns `false` and leaves everything, the
    /// file included, untouched when the name is already taken.
    pub fn add_product(&self, product: Product) -> Result<bool, StoreError> {
        for obs in &product.price_history {
            validate_price(obs.price)?;
        }
        self.update(|catalog| {
            if catalog.contains_key(&product.name) {
                return Ok(false);
            }
            catalog.insert(product.name.clone(), product);
            Ok(true)
        })
    }

    pub fn append_observation(&self, name: &str, observation: Observation) -> Result<(), StoreError> {
        validate_price(observation.price)?;
        self.update(|catalog| {
            let product = catalog
                .get_mut(name)
                .ok_or_else(|| StoreError::UnknownProduct(name.to_string()))?;
            product.price_history.push(observation);
            Ok(true)
        })?;
        Ok(())
    }

    // Load, mutate, save under both locks. `apply` returns whether it changed
    // anything; unchanged catalogs are not written.
    fn update<F>(&self, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Catalog) -> Result<bool, StoreError>,
    {
        let mut products = self.products.lock();
        let _guard = self.store.lock()?;
        let mut catalog = self.store.load()?;
        let changed = apply(&mut catalog);
        // Even a failed change refreshes the cache with what is on disk.
        if let Ok(true) = changed {
            self.store.save(&catalog)?;
        }
        *products = catalog;
        changed
    }
}

fn validate_price(price: f64) -> Result<(), StoreError> {
    if price.is_finite() && price >= 0.0 {
        Ok(())
    } else {
        Err(StoreError::InvalidPrice(price))
    }
}
