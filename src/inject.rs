//! Injection of PNG fallbacks into nbformat (v4) notebook JSON
//!
//! For every captured code cell the first display output keeps only the image:
//! the representations the PNG replaces are removed and `image/png` is set.

use crate::mime::{is_replaced_by_png, IMAGE_PNG};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

const DISPLAY_OUTPUT_TYPES: [&str; 2] = ["display_data", "execute_result"];
const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Accepts a PNG data URL or a bare base64 payload; other data URLs are rejected.
fn to_png_payload(data_url_or_payload: &str) -> Option<&str> {
    if let Some(payload) = data_url_or_payload.strip_prefix(PNG_DATA_URL_PREFIX) {
        return Some(payload);
    }
    if data_url_or_payload.starts_with("data:") {
        return None;
    }
    Some(data_url_or_payload)
}

/// Inject `png_fallbacks` (cell id -> data URL) into `notebook`, returning how
/// many cells were updated. Malformed cells are skipped.
pub fn inject_png_fallbacks_into_notebook(notebook: &mut Value, png_fallbacks: &HashMap<String, String>) -> usize {
    let Some(cells) = notebook.get_mut("cells").and_then(Value::as_array_mut) else {
        return 0;
    };

    let mut injected = 0;
    for cell in cells.iter_mut().filter_map(Value::as_object_mut) {
        if cell.get("cell_type").and_then(Value::as_str) != Some("code") {
            continue;
        }
        let Some(cell_id) = cell.get("id").and_then(Value::as_str) else {
            continue;
        };
        let Some(payload) = png_fallbacks
            .get(cell_id)
            .filter(|url| !url.is_empty())
            .and_then(|url| to_png_payload(url))
        else {
            continue;
        };
        let payload = payload.to_string();

        let Some(outputs) = cell.get_mut("outputs").and_then(Value::as_array_mut) else {
            continue;
        };

        let existing = outputs.iter().position(|output| {
            output
                .get("output_type")
                .and_then(Value::as_str)
                .is_some_and(|t| DISPLAY_OUTPUT_TYPES.contains(&t))
        });
        let index = match existing {
            Some(index) => index,
            None => {
                outputs.push(json!({
                    "output_type": "display_data",
                    "data": {},
                    "metadata": {}
                }));
                outputs.len() - 1
            }
        };

        let Some(display_output) = outputs[index].as_object_mut() else {
            continue;
        };
        let data = display_output
            .entry("data")
            .or_insert_with(|| Value::Object(Map::new()));
        if !data.is_object() {
            *data = Value::Object(Map::new());
        }
        if let Value::Object(data) = data {
            data.retain(|mimetype, _| !is_replaced_by_png(mimetype));
            data.insert(IMAGE_PNG.to_string(), Value::String(payload));
        }
        injected += 1;
    }

    injected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallbacks(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn code_cell(id: &str, outputs: Value) -> Value {
        json!({
            "cell_type": "code",
            "id": id,
            "source": "print('x')",
            "metadata": {},
            "execution_count": null,
            "outputs": outputs
        })
    }

    #[test]
    fn replaces_rasterized_mimetypes() {
        let mut nb = json!({
            "cells": [code_cell("cell-1", json!([{
                "output_type": "display_data",
                "data": {
                    "text/html": "<div>hello</div>",
                    "text/plain": "hello",
                    "application/vnd.vega.v5+json": {"mark": "point"},
                    "application/json": {"keep": true}
                },
                "metadata": {}
            }]))]
        });

        let count = inject_png_fallbacks_into_notebook(&mut nb, &fallbacks(&[("cell-1", "data:image/png;base64,Zm9v")]));

        assert_eq!(count, 1);
        let data = &nb["cells"][0]["outputs"][0]["data"];
        assert_eq!(
            data,
            &json!({ "application/json": {"keep": true}, "image/png": "Zm9v" })
        );
    }

    #[test]
    fn appends_display_output_when_missing() {
        let mut nb = json!({ "cells": [code_cell("cell-2", json!([]))] });
        let count = inject_png_fallbacks_into_notebook(&mut nb, &fallbacks(&[("cell-2", "data:image/png;base64,YWJj")]));

        assert_eq!(count, 1);
        let outputs = nb["cells"][0]["outputs"].as_array().unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(
            outputs[0],
            json!({ "output_type": "display_data", "data": { "image/png": "YWJj" }, "metadata": {} })
        );
    }

    #[test]
    fn reuses_execute_result_after_stream_output() {
        let mut nb = json!({ "cells": [code_cell("c", json!([
            { "output_type": "stream", "name": "stdout", "text": "log" },
            { "output_type": "execute_result", "data": "broken", "metadata": {}, "execution_count": 1 }
        ]))] });
        let count = inject_png_fallbacks_into_notebook(&mut nb, &fallbacks(&[("c", "YWJj")]));

        assert_eq!(count, 1);
        let outputs = nb["cells"][0]["outputs"].as_array().unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1]["data"], json!({ "image/png": "YWJj" }));
    }

    #[test]
    fn skips_non_png_data_urls_and_non_code_cells() {
        let mut nb = json!({ "cells": [
            code_cell("a", json!([])),
            { "cell_type": "markdown", "id": "b", "source": "", "metadata": {} },
            { "cell_type": "code", "id": 7, "outputs": [] },
            { "cell_type": "code", "id": "d", "outputs": "nope" }
        ] });
        let count = inject_png_fallbacks_into_notebook(
            &mut nb,
            &fallbacks(&[("a", "data:image/jpeg;base64,AAAA"), ("b", "AAAA"), ("d", "AAAA")]),
        );
        assert_eq!(count, 0);
        assert_eq!(nb["cells"][0]["outputs"], json!([]));
    }

    #[test]
    fn notebook_without_cells_is_untouched() {
        let mut nb = json!({ "metadata": {} });
        assert_eq!(inject_png_fallbacks_into_notebook(&mut nb, &fallbacks(&[("a", "x")])), 0);
    }
}
