//! Capture target classification and ordering
//!
//! A cell becomes a capture target when at least one of its output parts cannot be
//! embedded faithfully in a PDF: a chart-grammar spec, or textual output carrying
//! embedded component markup. Each target records what kind of dynamic behavior
//! its rendered node may show so the capture driver can wait accordingly.

use crate::mime::{self, COMPONENT_MARKERS, EMBEDDED_VEGA_MARKERS, WIDGET_MARKERS};
use crate::session::{CellId, OutputPayload, SessionView};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Why a target needs more than a plain "wait until visible".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureExpectation {
    /// Kernel-backed widget that initializes client-side.
    InteractiveWidget,
    /// Vega / Vega-Lite chart that renders asynchronously.
    ChartGrammar,
}

impl CaptureExpectation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureExpectation::InteractiveWidget => "interactive-widget",
            CaptureExpectation::ChartGrammar => "chart-grammar",
        }
    }
}

impl fmt::Display for CaptureExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cell whose rendered output must be screenshotted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterTarget {
    pub cell_id: CellId,
    /// Deduplicated, in order of first occurrence.
    pub expects: Vec<CaptureExpectation>,
    /// Output carries component markup that only a running notebook can initialize.
    pub requires_live: bool,
}

impl RasterTarget {
    pub fn new(cell_id: impl Into<CellId>, expects: Vec<CaptureExpectation>, requires_live: bool) -> Self {
        Self {
            cell_id: cell_id.into(),
            expects,
            requires_live,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.expects.is_empty()
    }

    /// Human-readable expectation summary for logs.
    pub fn describe_expects(&self) -> String {
        if self.expects.is_empty() {
            return "generic".to_string();
        }
        self.expects
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Whether a string payload, or any string in a list payload, contains a marker.
pub fn contains_marker(content: &Value, markers: &[&str]) -> bool {
    let hit = |s: &str| markers.iter().any(|m| s.contains(m));
    match content {
        Value::String(s) => hit(s),
        Value::Array(items) => items.iter().any(|v| v.as_str().is_some_and(hit)),
        _ => false,
    }
}

/// Eligibility of a single output part for PNG fallback capture.
pub fn should_rasterize_output(mimetype: &str, data: &Value) -> bool {
    if mime::is_vega(mimetype) {
        return true;
    }
    mime::is_text(mimetype) && contains_marker(data, &COMPONENT_MARKERS)
}

#[derive(Default)]
struct Accumulator {
    eligible: bool,
    requires_live: bool,
    expects: Vec<CaptureExpectation>,
}

impl Accumulator {
    fn visit(&mut self, mimetype: &str, content: &Value) {
        if should_rasterize_output(mimetype, content) {
            self.eligible = true;
        }
        if mime::is_text(mimetype) && contains_marker(content, &COMPONENT_MARKERS) {
            self.requires_live = true;
        }
        if contains_marker(content, &WIDGET_MARKERS) {
            self.push(CaptureExpectation::InteractiveWidget);
        }
        if mime::is_vega(mimetype) || contains_marker(content, &EMBEDDED_VEGA_MARKERS) {
            self.push(CaptureExpectation::ChartGrammar);
        }
    }

    fn push(&mut self, expectation: CaptureExpectation) {
        if !self.expects.contains(&expectation) {
            self.expects.push(expectation);
        }
    }

    fn finish(self, cell_id: &str) -> Option<RasterTarget> {
        if !self.eligible {
            return None;
        }
        Some(RasterTarget::new(cell_id, self.expects, self.requires_live))
    }
}

fn build_target_from_mimebundle(cell_id: &str, bundle: &Map<String, Value>) -> Option<RasterTarget> {
    let mut acc = Accumulator::default();
    for (mimetype, content) in bundle {
        acc.visit(mimetype, content);
    }
    acc.finish(cell_id)
}

fn build_target_from_output(cell_id: &str, mimetype: &str, data: &Value) -> Option<RasterTarget> {
    if !should_rasterize_output(mimetype, data) {
        return None;
    }
    let mut acc = Accumulator::default();
    acc.visit(mimetype, data);
    acc.finish(cell_id)
}

/// Scan every cell output and return the cells that need a PNG fallback.
///
/// Malformed bundles are skipped rather than reported.
pub fn collect_raster_targets(view: &SessionView) -> Vec<RasterTarget> {
    let mut targets = Vec::new();
    for (cell_id, notification) in &view.cell_notifications {
        let Some(output) = notification.output.as_ref() else {
            continue;
        };
        let target = match OutputPayload::decode(output) {
            Some(OutputPayload::Bundle(bundle)) => build_target_from_mimebundle(cell_id, &bundle),
            Some(OutputPayload::Single { mimetype, data }) => {
                build_target_from_output(cell_id, mimetype, data)
            }
            None => None,
        };
        if let Some(target) = target {
            targets.push(target);
        }
    }
    targets
}

/// Sort targets into notebook order; cells missing from the ordering go last.
pub fn sort_targets_by_notebook_order(view: &SessionView, mut targets: Vec<RasterTarget>) -> Vec<RasterTarget> {
    let Some(cell_ids) = view.cell_ids.as_ref() else {
        return targets;
    };
    let order: HashMap<&str, usize> = cell_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let fallback = order.len();
    targets.sort_by_key(|t| order.get(t.cell_id.as_str()).copied().unwrap_or(fallback));
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::MIMEBUNDLE_TYPE;
    use serde_json::json;

    fn ids(targets: &[RasterTarget]) -> Vec<&str> {
        targets.iter().map(|t| t.cell_id.as_str()).collect()
    }

    fn by_id(targets: &[RasterTarget]) -> HashMap<&str, &RasterTarget> {
        targets.iter().map(|t| (t.cell_id.as_str(), t)).collect()
    }

    #[test]
    fn detects_chart_bundles_and_component_markup() {
        let mut view = SessionView::new();
        view.set_output("1", "text/html", json!("<div>hello</div>"));
        view.set_output(
            "2",
            MIMEBUNDLE_TYPE,
            json!({
                "application/vnd.vegalite.v5+json": {"mark": "point"},
                "text/plain": "vega"
            }),
        );
        view.set_output(
            "3",
            "text/markdown",
            json!("&lt;marimo-anywidget data-initial-value='{\"model_id\":\"model-1\"}'&gt;&lt;/marimo-anywidget&gt;"),
        );
        view.set_output("4", "text/plain", json!("plain text"));
        view.set_output(
            "5",
            "text/html",
            json!("<marimo-stack>application/vnd.vegalite.v6+json</marimo-stack>"),
        );

        let targets = collect_raster_targets(&view);
        let map = by_id(&targets);
        let mut ids: Vec<_> = map.keys().copied().collect();
        ids.sort();
        assert_eq!(ids, vec!["2", "3", "5"]);

        assert_eq!(map["2"].expects, vec![CaptureExpectation::ChartGrammar]);
        assert!(!map["2"].requires_live);
        assert_eq!(map["3"].expects, vec![CaptureExpectation::InteractiveWidget]);
        assert!(map["3"].requires_live);
        assert_eq!(map["5"].expects, vec![CaptureExpectation::ChartGrammar]);
        assert!(map["5"].requires_live);
    }

    #[test]
    fn widget_and_chart_keep_first_seen_order() {
        let mut view = SessionView::new();
        view.set_output(
            "w",
            MIMEBUNDLE_TYPE,
            json!({
                "text/html": "<marimo-anywidget></marimo-anywidget>",
                "text/markdown": "<marimo-anywidget>application/vnd.vega.v5+json</marimo-anywidget>"
            }),
        );
        let targets = collect_raster_targets(&view);
        assert_eq!(
            targets[0].expects,
            vec![CaptureExpectation::InteractiveWidget, CaptureExpectation::ChartGrammar]
        );
        assert_eq!(targets[0].describe_expects(), "interactive-widget,chart-grammar");
    }

    #[test]
    fn unknown_cells_keep_session_order() {
        let chart = json!({ "mimetype": "application/vnd.vega.v5+json", "data": {} });
        let view: SessionView = serde_json::from_value(json!({
            "cell_notifications": {
                "zeta": { "cell_id": "zeta", "output": chart.clone() },
                "known": { "cell_id": "known", "output": chart.clone() },
                "alpha": { "cell_id": "alpha", "output": chart }
            },
            "cell_ids": ["known"]
        }))
        .unwrap();

        let targets = collect_raster_targets(&view);
        assert_eq!(ids(&targets), vec!["zeta", "known", "alpha"]);
        assert_eq!(
            ids(&sort_targets_by_notebook_order(&view, targets)),
            vec!["known", "zeta", "alpha"]
        );

        let unordered = SessionView {
            cell_ids: None,
            ..view.clone()
        };
        let targets = collect_raster_targets(&unordered);
        assert_eq!(
            ids(&sort_targets_by_notebook_order(&unordered, targets)),
            vec!["zeta", "known", "alpha"]
        );
    }

    #[test]
    fn bundle_expectations_follow_key_order_not_alphabetical_order() {
        let mut view = SessionView::new();
        view.set_output(
            "w",
            MIMEBUNDLE_TYPE,
            json!({
                "text/html": "<marimo-anywidget></marimo-anywidget>",
                "application/vnd.vegalite.v5+json": {"mark": "point"}
            }),
        );
        // String-encoded bundles keep their key order too.
        view.set_output(
            "s",
            MIMEBUNDLE_TYPE,
            json!(r#"{"text/markdown": "&lt;marimo-anywidget&gt;", "application/vnd.vega.v5+json": {}}"#),
        );

        let targets = collect_raster_targets(&view);
        let map = by_id(&targets);
        for id in ["w", "s"] {
            assert_eq!(
                map[id].expects,
                vec![CaptureExpectation::InteractiveWidget, CaptureExpectation::ChartGrammar]
            );
        }
    }

    #[test]
    fn list_payloads_are_scanned() {
        let mut view = SessionView::new();
        view.set_output("l", "text/html", json!(["<p>", "<marimo-slider></marimo-slider>"]));
        let targets = collect_raster_targets(&view);
        assert_eq!(targets.len(), 1);
        assert!(targets[0].is_generic());
        assert_eq!(targets[0].describe_expects(), "generic");
    }

    #[test]
    fn bundle_without_eligible_parts_yields_nothing() {
        let mut view = SessionView::new();
        view.set_output(
            "b",
            MIMEBUNDLE_TYPE,
            json!(r#"{"text/plain": "x", "image/png": "AAAA"}"#),
        );
        view.set_output("bad", MIMEBUNDLE_TYPE, json!("{nope"));
        view.set_output("json", "application/json", json!("<marimo-ui>"));
        assert!(collect_raster_targets(&view).is_empty());
    }

    #[test]
    fn sorts_by_notebook_order_with_unknown_last() {
        let mut view = SessionView::new();
        view.set_cell_ids(["c", "a"]);
        let targets = vec![
            RasterTarget::new("a", vec![], false),
            RasterTarget::new("zz", vec![], false),
            RasterTarget::new("c", vec![], false),
            RasterTarget::new("b", vec![], false),
        ];
        let sorted = sort_targets_by_notebook_order(&view, targets);
        let ids: Vec<_> = sorted.iter().map(|t| t.cell_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "zz", "b"]);
    }

    #[test]
    fn ordering_is_untouched_without_cell_ids() {
        let view = SessionView::new();
        let targets = vec![RasterTarget::new("b", vec![], false), RasterTarget::new("a", vec![], false)];
        let sorted = sort_targets_by_notebook_order(&view, targets.clone());
        assert_eq!(sorted, targets);
    }
}
