//! Concrete marketplace adapters and the factory that builds them from
//! settings.

mod amazon;
mod ciceksepeti;
mod hepsiburada;
mod n11;
mod pazarama;
mod trendyol;

pub use amazon::AmazonAdapter;
pub use ciceksepeti::CiceksepetiAdapter;
pub use hepsiburada::HepsiburadaAdapter;
pub use n11::N11Adapter;
pub use pazarama::PazaramaAdapter;
pub use trendyol::TrendyolAdapter;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use mps_config::MarketplaceSettings;
use mps_schemas::MarketplaceId;

use crate::adapter::MarketplaceAdapter;
use crate::http::build_http;

/// Page size requested from paginated listing endpoints.
pub(crate) const PAGE_SIZE: u32 = 200;
/// Upper bound on pages fetched in one listing call.
pub(crate) const MAX_PAGES: u32 = 500;

pub fn default_base_url(m: MarketplaceId) -> &'static str {
    match m {
        MarketplaceId::Trendyol => "https://api.trendyol.com/sapigw",
        MarketplaceId::Amazon => "https://sellingpartnerapi-eu.amazon.com",
        MarketplaceId::N11 => "https://api.n11.com",
        MarketplaceId::Hepsiburada => "https://mpop.hepsiburada.com",
        MarketplaceId::Pazarama => "https://isortagimapi.pazarama.com",
        MarketplaceId::Ciceksepeti => "https://apis.ciceksepeti.com",
    }
}

/// Build the adapter for `m`. A `base_url` override redirects every
/// endpoint, token endpoints included, to that host.
pub fn build_adapter(
    m: MarketplaceId,
    settings: &MarketplaceSettings,
) -> Result<Arc<dyn MarketplaceAdapter>> {
    let http = build_http(Duration::from_millis(settings.timeout_ms))?;
    let overridden = settings.base_url.as_deref();
    let base = overridden.unwrap_or_else(|| default_base_url(m));

    let adapter: Arc<dyn MarketplaceAdapter> = match m {
        MarketplaceId::Trendyol => Arc::new(TrendyolAdapter::new(http, base)),
        MarketplaceId::Amazon => {
            let token_url = match overridden {
                Some(b) => format!("{}/auth/o2/token", b.trim_end_matches('/')),
                None => amazon::DEFAULT_TOKEN_URL.to_string(),
            };
            Arc::new(AmazonAdapter::new(http, base, token_url))
        }
        MarketplaceId::N11 => Arc::new(N11Adapter::new(http, base)),
        MarketplaceId::Hepsiburada => Arc::new(HepsiburadaAdapter::new(http, base)),
        MarketplaceId::Pazarama => {
            let token_url = match overridden {
                Some(b) => format!("{}/connect/token", b.trim_end_matches('/')),
                None => pazarama::DEFAULT_TOKEN_URL.to_string(),
            };
            Arc::new(PazaramaAdapter::new(http, base, token_url))
        }
        MarketplaceId::Ciceksepeti => Arc::new(CiceksepetiAdapter::new(http, base)),
    };
    Ok(adapter)
}

/// Epoch milliseconds to UTC, falling back to the epoch for out-of-range input.
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
}

/// RFC 3339 or naive `YYYY-MM-DDTHH:MM:SS` (read as UTC).
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| Utc.from_utc_datetime(&n))
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
