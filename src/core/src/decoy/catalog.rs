use std::borrow::Cow;

use bytes::Bytes;
use log::debug;
use rust_embed::RustEmbed;

use crate::error_handling::types::DecoyError;

/// Decoy pages compiled into the binary.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/decoys/"]
pub struct DecoyAssets;

/// One decoy response body and the content type it is served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoyPage {
    pub path: String,
    pub content_type: String,
    pub body: Bytes,
}

impl DecoyPage {
    pub fn new(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let path = path.into();
        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();
        Self {
            path,
            content_type,
            body: body.into(),
        }
    }
}

/// Ordered, non-empty collection of decoy pages.
///
/// Pages are kept sorted by path so the index a host maps to does not depend
/// on the order the asset bundle enumerates them in.
#[derive(Debug, Clone)]
pub struct PageCatalog {
    pages: Vec<DecoyPage>,
}

impl PageCatalog {
    /// Loads the pages embedded from the `decoys/` directory.
    pub fn embedded() -> Result<Self, DecoyError> {
        Self::from_embed::<DecoyAssets>()
    }

    pub fn from_embed<E: RustEmbed>() -> Result<Self, DecoyError> {
        let pages = E::iter()
            .filter_map(|path| {
                let file = E::get(&path)?;
                let body = match file.data {
                    Cow::Borrowed(data) => Bytes::from_static(data),
                    Cow::Owned(data) => Bytes::from(data),
                };
                Some(DecoyPage::new(path.into_owned(), body))
            })
            .collect();
        Self::from_pages(pages)
    }

    pub fn from_pages(mut pages: Vec<DecoyPage>) -> Result<Self, DecoyError> {
        if pages.is_empty() {
            return Err(DecoyError::NoPages);
        }
        pages.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Loaded {} decoy pages", pages.len());
        Ok(Self { pages })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> &[DecoyPage] {
        &self.pages
    }
}
