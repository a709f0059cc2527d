use anyhow::{
    Context,
    Result,
    anyhow,
};
use std::{
    collections::BTreeMap,
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        Mutex,
    },
};

pub const API_KEY_SETTING: &str = "bitrefillApiKey";
pub const PRODUCT_SETTING: &str = "bitrefillProduct";
pub const DEFAULT_PRODUCT: &str = "affiliate-tester";
pub const DEFAULT_SETTINGS_PATH: &str = "~/.config/channel-gifter/settings.json";

/// String key/value settings shared by the operator UI.
pub trait ConfigProvider {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Settings persisted as a flat JSON object. The file is created on first write.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = read_values(&path)?;
        Ok(Self { path, values })
    }

    /// Opens the store at `raw`, expanding `~`, or at the default location.
    pub fn open_default(raw: Option<&str>) -> Result<Self> {
        let raw = raw.unwrap_or(DEFAULT_SETTINGS_PATH);
        let expanded = shellexpand::tilde(raw);
        Self::open(PathBuf::from(expanded.into_owned()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for FileConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_owned(), value.to_owned());
        write_values(&self.path, &self.values)
    }
}

fn read_values(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = fs::read(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice(&data)
        .with_context(|| format!("Settings file {} is not a JSON object", path.display()))
}

fn write_values(path: &Path, values: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create settings directory {}", parent.display())
        })?;
    }
    let json = serde_json::to_vec_pretty(values).context("Failed to serialize settings")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write settings file {}", path.display()))
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryConfigStore {
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        if let Ok(mut guard) = self.values.lock() {
            guard.insert(key.to_owned(), value.to_owned());
        }
        self
    }

    pub fn values(&self) -> Arc<Mutex<BTreeMap<String, String>>> {
        self.values.clone()
    }
}

impl ConfigProvider for InMemoryConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self
            .values
            .lock()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Typed view over the Bitrefill keys of a [`ConfigProvider`].
#[derive(Debug)]
pub struct BitrefillSettings<C> {
    provider: C,
}

impl<C: ConfigProvider> BitrefillSettings<C> {
    pub fn new(provider: C) -> Self {
        Self { provider }
    }

    pub fn api_key(&self) -> Result<Option<String>> {
        self.provider.get(API_KEY_SETTING)
    }

    pub fn set_api_key(&mut self, api_key: &str) -> Result<()> {
        self.provider.set(API_KEY_SETTING, api_key)
    }

    pub fn has_api_key(&self) -> Result<bool> {
        self.provider.has(API_KEY_SETTING)
    }

    /// Selected gift-card product. Writes the default back on first read.
    pub fn product(&mut self) -> Result<String> {
        match self.provider.get(PRODUCT_SETTING)? {
            Some(product) if !product.is_empty() => Ok(product),
            _ => {
                self.provider.set(PRODUCT_SETTING, DEFAULT_PRODUCT)?;
                Ok(DEFAULT_PRODUCT.to_owned())
            }
        }
    }

    pub fn set_product(&mut self, product: &str) -> Result<()> {
        self.provider.set(PRODUCT_SETTING, product)
    }
}
