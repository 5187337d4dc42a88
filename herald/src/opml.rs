//! OPML import (spec.md §6, external consumer — not part of the core).
//! Reads `<outline xmlUrl=... text=...>` elements with `scraper`'s
//! permissive HTML parser rather than a strict XML parser, the same
//! tolerance-over-strictness tradeoff the teacher makes when it reaches
//! for `scraper` (`scraping.rs`) instead of `quick-xml` for loosely
//! structured markup it doesn't control the source of.

use anyhow::{Context, Result};
use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::engine::Engine;

#[derive(Debug, Clone)]
pub struct OpmlOutline {
    pub title: String,
    pub xml_url: String,
}

/// Parse outline elements carrying an `xmlUrl` attribute out of OPML text.
/// Title falls back to the `text` attribute, then to the URL itself, the
/// same three-tier fallback the retrieved `opml::parse` reference uses.
pub fn parse_outlines(opml_text: &str) -> Result<Vec<OpmlOutline>> {
    let document = Html::parse_document(opml_text);
    let selector = Selector::parse("outline[xmlurl]").map_err(|e| anyhow::anyhow!("bad selector: {:?}", e))?;

    let mut outlines = Vec::new();
    for el in document.select(&selector) {
        let xml_url = match el.value().attr("xmlurl") {
            Some(u) if !u.is_empty() => u.to_string(),
            _ => continue,
        };
        let title = el
            .value()
            .attr("title")
            .or_else(|| el.value().attr("text"))
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| xml_url.clone());

        outlines.push(OpmlOutline { title, xml_url });
    }
    Ok(outlines)
}

/// Import every feed in an OPML document for one user via the Engine,
/// logging and continuing past individual subscription failures rather
/// than aborting the whole import (the same per-item continue-on-error
/// discipline the Pipeline uses).
pub async fn import(engine: &Engine, user_id: i64, opml_text: &str) -> Result<ImportReport> {
    let outlines = parse_outlines(opml_text).context("failed to parse OPML")?;

    let mut report = ImportReport {
        found: outlines.len(),
        ..Default::default()
    };

    for outline in outlines {
        match engine.subscribe_feed(user_id, &outline.xml_url).await {
            Ok(_) => {
                report.subscribed += 1;
                info!(url = %outline.xml_url, title = %outline.title, "opml: subscribed");
            }
            Err(e) => {
                warn!(url = %outline.xml_url, error = %e, "opml: failed to subscribe, continuing with next outline");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub found: usize,
    pub subscribed: usize,
    pub failed: usize,
}
