//! Tracking token decomposition.
//!
//! Affiliate networks pass one composite token through their systems and echo
//! it back in the export. The token packs up to four identifiers:
//!
//! ```text
//! <measureId>_TCLICK_<tclickId>_YCLID_<clickId>_UTMC_<utmContent>
//!            └ marker ┘          └ click tag ┘        └ marker ┘
//! ```
//!
//! The click tag is one of several network markers (`_YCLID_`, `_GCLID_`,
//! `_CLID_`). When a token holds more than one tag-like substring, the vendor's
//! priority list decides: the first tag in list order that occurs anywhere in the
//! scanned text wins, regardless of position.
//!
//! Two grammars exist because vendors disagree on which marker binds first:
//!
//! - [`Grammar::TclickFirst`] splits on `_TCLICK_` and then looks for a click tag
//!   only in the remainder.
//! - [`Grammar::ClickTagFirst`] locates the click tag in the whole token first,
//!   then splits `_TCLICK_` out of the left part. Without a tag, the click segment
//!   comes from a vendor-supplied secondary field.

use serde::{Deserialize, Serialize};

/// Marker preceding the internal click id.
pub const TCLICK_MARKER: &str = "_TCLICK_";

/// Marker preceding the campaign-content tag.
pub const UTMC_MARKER: &str = "_UTMC_";

/// Default click-network tag priority.
pub const DEFAULT_CLICK_TAGS: [&str; 3] = ["_YCLID_", "_GCLID_", "_CLID_"];

/// Delimiter precedence used by a vendor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grammar {
    /// `_TCLICK_` binds first; click tags are only searched after it.
    #[default]
    TclickFirst,
    /// Click tags bind first; `_TCLICK_` is split out of the left part.
    ClickTagFirst,
}

/// Grammar plus ordered click-tag priority for one vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRules {
    #[serde(default)]
    pub grammar: Grammar,
    /// Click tags in priority order. Empty disables tag detection.
    #[serde(default = "default_click_tags")]
    pub click_tags: Vec<String>,
}

fn default_click_tags() -> Vec<String> {
    DEFAULT_CLICK_TAGS.iter().map(|t| t.to_string()).collect()
}

impl Default for TokenRules {
    fn default() -> Self {
        Self {
            grammar: Grammar::TclickFirst,
            click_tags: default_click_tags(),
        }
    }
}

impl TokenRules {
    pub fn new(grammar: Grammar) -> Self {
        Self {
            grammar,
            ..Self::default()
        }
    }

    pub fn with_click_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.click_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Decompose `token` under these rules.
    pub fn decompose(&self, token: &str, secondary: Option<&str>) -> TrackingParts {
        decompose(token, secondary, self)
    }
}

/// The four identifiers carried by a tracking token.
///
/// Empty sub-fields are stored as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingParts {
    pub measure_id: Option<String>,
    pub tclick_id: Option<String>,
    pub click_id: Option<String>,
    pub utm_content: Option<String>,
}

impl TrackingParts {
    fn from_parts(measure: &str, tclick: &str, click: &str, utm: &str) -> Self {
        Self {
            measure_id: non_empty(measure),
            tclick_id: non_empty(tclick),
            click_id: non_empty(click),
            utm_content: non_empty(utm),
        }
    }

    /// Select one part by name.
    pub fn part(&self, part: TrackingPart) -> Option<&str> {
        match part {
            TrackingPart::MeasureId => self.measure_id.as_deref(),
            TrackingPart::TclickId => self.tclick_id.as_deref(),
            TrackingPart::ClickId => self.click_id.as_deref(),
            TrackingPart::UtmContent => self.utm_content.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.measure_id.is_none()
            && self.tclick_id.is_none()
            && self.click_id.is_none()
            && self.utm_content.is_none()
    }

    /// Rebuild a token from the parts with the given click tag.
    ///
    /// Absent parts drop their marker, so the result equals the original token
    /// only when the original carried no empty segments.
    pub fn reassemble(&self, click_tag: &str) -> String {
        let mut out = self.measure_id.clone().unwrap_or_default();
        if let Some(t) = &self.tclick_id {
            out.push_str(TCLICK_MARKER);
            out.push_str(t);
        }
        if let Some(c) = &self.click_id {
            out.push_str(click_tag);
            out.push_str(c);
        }
        if let Some(u) = &self.utm_content {
            out.push_str(UTMC_MARKER);
            out.push_str(u);
        }
        out
    }
}

/// Names of the four token parts, used by column mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPart {
    MeasureId,
    TclickId,
    ClickId,
    UtmContent,
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Find the first tag, in priority order, that occurs in `text` and split around it.
///
/// Returns `(before, tag, after)`.
pub fn find_click_tag<'a, 't>(
    text: &'a str,
    tags: &'t [String],
) -> Option<(&'a str, &'t str, &'a str)> {
    tags.iter().find_map(|tag| {
        text.find(tag.as_str())
            .map(|pos| (&text[..pos], tag.as_str(), &text[pos + tag.len()..]))
    })
}

/// Split a click segment into `(clickId, utmContent)` on the first `_UTMC_`.
pub fn split_utm(segment: &str) -> (&str, &str) {
    segment.split_once(UTMC_MARKER).unwrap_or((segment, ""))
}

/// Split `text` into `(measureId, tclickId)` on the first `_TCLICK_`.
pub fn split_tclick(text: &str) -> (&str, &str) {
    text.split_once(TCLICK_MARKER).unwrap_or((text, ""))
}

/// Decompose a tracking token.
///
/// `secondary` is only consulted by [`Grammar::ClickTagFirst`] when no click tag
/// is found in `token`.
pub fn decompose(token: &str, secondary: Option<&str>, rules: &TokenRules) -> TrackingParts {
    match rules.grammar {
        Grammar::TclickFirst => decompose_tclick_first(token, &rules.click_tags),
        Grammar::ClickTagFirst => decompose_click_tag_first(token, secondary, &rules.click_tags),
    }
}

fn decompose_tclick_first(token: &str, tags: &[String]) -> TrackingParts {
    let (measure, tclick, segment) = match token.split_once(TCLICK_MARKER) {
        Some((measure, rest)) => match find_click_tag(rest, tags) {
            Some((tclick, _, segment)) => (measure, tclick, segment),
            None => (measure, rest, ""),
        },
        None => match find_click_tag(token, tags) {
            Some((measure, _, segment)) => (measure, "", segment),
            None => (token, "", ""),
        },
    };
    let (click, utm) = split_utm(segment);
    TrackingParts::from_parts(measure, tclick, click, utm)
}

fn decompose_click_tag_first(token: &str, secondary: Option<&str>, tags: &[String]) -> TrackingParts {
    let (left, segment) = match find_click_tag(token, tags) {
        Some((left, _, right)) => (left, right),
        None => (token, secondary.unwrap_or("")),
    };
    let (measure, tclick) = split_tclick(left);
    let (click, utm) = split_utm(segment);
    TrackingParts::from_parts(measure, tclick, click, utm)
}
