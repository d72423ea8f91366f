//! Markup normalization on a copy of the session view
//!
//! Escaped component markup (`&lt;marimo-...&gt;`) exported as text renders as
//! literal text, so the page never builds the component and the driver's DOM
//! queries cannot find it. Before a static export, target outputs carrying
//! component markers are promoted to unescaped `text/html`.

use crate::mime::{COMPONENT_MARKERS, MIMEBUNDLE_TYPE, TEXT_HTML, TEXT_MARKDOWN, TEXT_PLAIN};
use crate::session::{load_mimebundle, CellOutput, SessionView};
use crate::targets::{contains_marker, RasterTarget};
use serde_json::Value;
use std::borrow::Cow;

/// Return a copy of `view` with every target's component markup promoted to
/// unescaped HTML. `view` itself is never modified.
pub fn promote_component_markup_for_capture(view: &SessionView, targets: &[RasterTarget]) -> SessionView {
    let mut capture_view = view.clone();

    for target in targets {
        let Some(output) = capture_view
            .cell_notifications
            .get_mut(&target.cell_id)
            .and_then(|n| n.output.as_mut())
        else {
            continue;
        };

        if crate::mime::is_text(&output.mimetype) {
            promote_text_output(output);
        } else if output.mimetype == MIMEBUNDLE_TYPE {
            promote_mimebundle_output(output);
        }
    }

    capture_view
}

fn promote_text_output(output: &mut CellOutput) {
    if !contains_marker(&output.data, &COMPONENT_MARKERS) {
        return;
    }
    output.mimetype = TEXT_HTML.to_string();
    output.data = unescape_component_markup(&output.data);
}

fn promote_mimebundle_output(output: &mut CellOutput) {
    let Some(mut bundle) = load_mimebundle(&output.data) else {
        return;
    };

    let source = [TEXT_HTML, TEXT_PLAIN, TEXT_MARKDOWN].into_iter().find_map(|mimetype| {
        bundle
            .get(mimetype)
            .filter(|content| contains_marker(content, &COMPONENT_MARKERS))
            .map(unescape_component_markup)
    });

    if let Some(html) = source {
        bundle.insert(TEXT_HTML.to_string(), html);
        output.data = Value::Object(bundle);
    }
}

fn unescape_component_markup(data: &Value) -> Value {
    match data {
        Value::String(s) => Value::String(unescape_html(s).into_owned()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Value::String(unescape_html(s).into_owned()),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Decode HTML character references (named, decimal, and hex).
///
/// Named references cover the entities that show up in escaped markup, not the
/// full HTML5 table. The legacy names (`&amp`, `&lt`, `&gt`, `&quot`, `&nbsp`,
/// `&copy`, `&reg`) also decode without a trailing `;`. Anything else is kept
/// verbatim.
pub fn unescape_html(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('&') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let reference = after
            .find(';')
            .filter(|&end| end > 0 && end <= 10)
            .and_then(|end| decode_reference(&after[..end]).map(|c| (c, end)));

        match reference {
            Some((decoded, end)) => {
                result.push_str(&decoded);
                rest = &after[end + 1..];
            }
            None => match LEGACY_ENTITIES.iter().find(|(name, _)| after.starts_with(name)) {
                Some((name, decoded)) => {
                    result.push_str(decoded);
                    rest = &after[name.len()..];
                }
                None => {
                    result.push('&');
                    rest = after;
                }
            },
        }
    }
    result.push_str(rest);

    Cow::Owned(result)
}

/// Entities HTML accepts without a terminating `;`, longest match first.
const LEGACY_ENTITIES: [(&str, &str); 7] = [
    ("quot", "\""),
    ("nbsp", "\u{a0}"),
    ("copy", "\u{a9}"),
    ("amp", "&"),
    ("reg", "\u{ae}"),
    ("lt", "<"),
    ("gt", ">"),
];

fn decode_reference(entity: &str) -> Option<String> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }

    let decoded = match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "times" => "\u{d7}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        _ => return None,
    };
    Some(decoded.to_string())
}
