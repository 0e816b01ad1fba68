//! Deterministic decoy selection.
//!
//! The requested host is hashed once with CRC-64 (XZ / Go ECMA variant) and the
//! same 64-bit value indexes both the banner pool and the page catalog. A host
//! therefore always sees the same server identity for the lifetime of the
//! process, while banner and page vary independently across hosts because the
//! two pools have different sizes.
//!
//! Banners are checked as header values when the selector is built, so a pool
//! entry that could not be sent as `Server` stops startup instead of being
//! served without one.

use crc::{Crc, CRC_64_XZ};
use hyper::header::HeaderValue;

use crate::decoy::catalog::{DecoyPage, PageCatalog};
use crate::error_handling::types::DecoyError;

/// `Server` header values the HTTP decoy claims to be.
pub const SERVER_BANNERS: [&str; 10] = [
    "Apache/2.4.48 (Unix) OpenSSL/1.1.1k PHP/7.4.24",
    "nginx/1.21.0",
    "Microsoft-IIS/10.0",
    "LiteSpeed",
    "Node.js",
    "PHP/8.0.10",
    "Apache Tomcat/9.0.50",
    "Jetty(9.4.43.v20210629)",
    "rExpress",
    "Python/3.9.5",
];

const HOST_CHECKSUM: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

pub fn host_checksum(host: &str) -> u64 {
    HOST_CHECKSUM.checksum(host.as_bytes())
}

/// Banner and page served for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoyIdentity<'a> {
    pub banner: &'a str,
    /// `banner` as a ready-to-send header value
    pub server: &'a HeaderValue,
    pub page: &'a DecoyPage,
}

#[derive(Debug)]
struct Banner {
    text: String,
    server: HeaderValue,
}

pub struct DecoySelector {
    banners: Vec<Banner>,
    catalog: PageCatalog,
}

impl DecoySelector {
    pub fn new(banners: Vec<String>, catalog: PageCatalog) -> Result<Self, DecoyError> {
        if banners.is_empty() {
            return Err(DecoyError::NoBanners);
        }
        let banners = banners
            .into_iter()
            .map(|text| match HeaderValue::from_str(&text) {
                Ok(server) => Ok(Banner { text, server }),
                Err(_) => Err(DecoyError::InvalidBanner(text)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { banners, catalog })
    }

    /// Selector over the built-in banner pool.
    pub fn with_default_banners(catalog: PageCatalog) -> Self {
        Self {
            banners: SERVER_BANNERS
                .iter()
                .map(|&b| Banner {
                    text: b.to_string(),
                    server: HeaderValue::from_static(b),
                })
                .collect(),
            catalog,
        }
    }

    /// (banner index, page index) for `host`.
    pub fn indices(&self, host: &str) -> (usize, usize) {
        let sum = host_checksum(host);
        (
            (sum % self.banners.len() as u64) as usize,
            (sum % self.catalog.len() as u64) as usize,
        )
    }

    pub fn select(&self, host: &str) -> DecoyIdentity<'_> {
        let (banner, page) = self.indices(host);
        let banner = &self.banners[banner];
        DecoyIdentity {
            banner: &banner.text,
            server: &banner.server,
            page: &self.catalog.pages()[page],
        }
    }

    pub fn banner_count(&self) -> usize {
        self.banners.len()
    }

    pub fn page_count(&self) -> usize {
        self.catalog.len()
    }
}
