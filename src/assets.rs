use anyhow::{anyhow, Context, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Collects name → blob registrations during startup. Call [`EmbeddedAssetsBuilder::freeze`]
/// before any worker thread starts; the frozen table is never mutated again.
#[derive(Default)]
pub struct EmbeddedAssetsBuilder {
    entries: HashMap<String, Cow<'static, [u8]>>,
}

impl EmbeddedAssetsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty names and empty blobs are ignored. A later registration replaces an earlier one.
    pub fn register(&mut self, name: impl Into<String>, bytes: impl Into<Cow<'static, [u8]>>) -> &mut Self {
        let name = name.into();
        let bytes = bytes.into();
        if name.is_empty() || bytes.is_empty() {
            return self;
        }
        self.entries.insert(name, bytes);
        self
    }

    pub fn freeze(self) -> Arc<EmbeddedAssets> {
        Arc::new(EmbeddedAssets { entries: self.entries })
    }
}

pub struct EmbeddedAssets {
    entries: HashMap<String, Cow<'static, [u8]>>,
}

impl EmbeddedAssets {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up `key` verbatim, then without a leading `./` (or `.\`), then by file name alone.
    pub fn find(&self, key: &str) -> Option<&[u8]> {
        if key.is_empty() {
            return None;
        }
        if let Some(bytes) = self.entries.get(key) {
            return Some(bytes);
        }
        if let Some(stripped) = key.strip_prefix("./").or_else(|| key.strip_prefix(".\\")) {
            if let Some(bytes) = self.entries.get(stripped) {
                return Some(bytes);
            }
        }
        let file_name = Path::new(key).file_name()?.to_str()?;
        self.entries.get(file_name).map(|bytes| bytes.as_ref())
    }

    /// Embedded data first, then the filesystem (relative paths resolved against the working
    /// directory, whose absolute form is also tried against the table).
    pub fn load(&self, path: &str) -> Result<Cow<'_, [u8]>> {
        if let Some(bytes) = self.find(path) {
            return Ok(Cow::Borrowed(bytes));
        }
        let candidate = Path::new(path);
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            env::current_dir().context("Resolving working directory")?.join(candidate)
        };
        if let Some(bytes) = absolute.to_str().and_then(|abs| self.find(abs)) {
            return Ok(Cow::Borrowed(bytes));
        }
        let bytes = fs::read(&absolute).with_context(|| format!("Reading asset {}", absolute.display()))?;
        Ok(Cow::Owned(bytes))
    }
}

#[derive(Debug, Clone)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage> {
    let decoded = image::load_from_memory(bytes).context("Decoding image")?.to_rgba8();
    let (width, height) = decoded.dimensions();
    Ok(RgbaImage { width, height, pixels: decoded.into_raw() })
}

pub fn load_rgba(assets: &EmbeddedAssets, path: &str) -> Result<RgbaImage> {
    let bytes = assets.load(path)?;
    decode_rgba(&bytes).with_context(|| format!("Loading image '{path}'"))
}

/// Images loaded on behalf of the script, addressed by insertion index.
#[derive(Default)]
pub struct ImageRegistry {
    images: Vec<RgbaImage>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, assets: &EmbeddedAssets, path: &str) -> Result<usize> {
        let image = load_rgba(assets, path)?;
        self.images.push(image);
        Ok(self.images.len() - 1)
    }

    pub fn get(&self, index: i64) -> Result<&RgbaImage> {
        usize::try_from(index)
            .ok()
            .and_then(|idx| self.images.get(idx))
            .ok_or_else(|| anyhow!("Invalid image index {index}"))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
