//! Render payloads: creative overrides first, listing attributes second.

use motorads_core::types::{Creative, Listing};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedAd {
    pub headline: String,
    pub subtitle: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<f64>,
    pub city: Option<String>,
    pub cta: Option<String>,
}

pub fn render(creative: &Creative, listing: Option<&Listing>) -> RenderedAd {
    let headline = creative
        .headline
        .clone()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| listing.map(listing_title).unwrap_or_default());

    RenderedAd {
        headline,
        subtitle: creative.subtitle.clone(),
        image_url: listing.and_then(|l| l.images.first()).map(|img| img.url.clone()),
        price: listing.and_then(|l| l.price),
        city: listing.and_then(|l| l.city.clone()),
        cta: creative.cta.clone(),
    }
}

/// "Make Model", skipping whichever part is unknown.
fn listing_title(listing: &Listing) -> String {
    [listing.make.as_deref(), listing.model.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
}
