//! UI hierarchy parsing and selector resolution.
//!
//! Two dump dialects are understood: the uiautomator XML attribute format
//! with `[l,t][r,b]` bounds, and a nested JSON tree with per-node
//! `attributes`/`children` maps.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// One element extracted from a UI dump or OCR pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UINode {
    pub text: String,
    pub resource_id: String,
    pub content_desc: String,
    pub class_name: String,
    pub clickable: bool,
    /// Bounding box as (left, top, right, bottom) in device pixels.
    pub bounds: (i32, i32, i32, i32),
}

impl UINode {
    /// Center point of the bounding box.
    pub fn center(&self) -> (i32, i32) {
        let (left, top, right, bottom) = self.bounds;
        ((left + right) / 2, (top + bottom) / 2)
    }

    /// Area of the bounding box; degenerate boxes count as zero.
    pub fn area(&self) -> i64 {
        let (left, top, right, bottom) = self.bounds;
        (right - left).max(0) as i64 * (bottom - top).max(0) as i64
    }
}

static BOUNDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").unwrap());
static NODE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<node\b([^>]*)>").unwrap());
static ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([\w-]+)="([^"]*)""#).unwrap());

fn parse_bounds(bounds: &str) -> Option<(i32, i32, i32, i32)> {
    let caps = BOUNDS_RE.captures(bounds)?;
    let get = |i: usize| caps[i].parse::<i32>().ok();
    Some((get(1)?, get(2)?, get(3)?, get(4)?))
}

/// Parse a uiautomator XML dump into a node list.
///
/// The dump is a flat stream of `<node …>` tags as far as selection cares;
/// nesting carries no extra information beyond the bounds, so a tag scan is
/// enough and survives the truncated dumps some devices emit.
pub fn parse_uiautomator_xml(xml: &str) -> Vec<UINode> {
    let mut nodes = Vec::new();
    for tag in NODE_TAG_RE.captures_iter(xml) {
        let mut text = String::new();
        let mut resource_id = String::new();
        let mut content_desc = String::new();
        let mut class_name = String::new();
        let mut clickable = false;
        let mut bounds = None;

        for attr in ATTR_RE.captures_iter(&tag[1]) {
            let value = unescape_xml(&attr[2]);
            match &attr[1] {
                "text" => text = value,
                "resource-id" => resource_id = value,
                "content-desc" => content_desc = value,
                "class" => class_name = value,
                "clickable" => clickable = value == "true",
                "bounds" => bounds = parse_bounds(&value),
                _ => {}
            }
        }

        if let Some(bounds) = bounds {
            nodes.push(UINode {
                text,
                resource_id,
                content_desc,
                class_name,
                clickable,
                bounds,
            });
        }
    }
    nodes
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse a JSON layout tree (per-node `attributes` map + `children`).
pub fn parse_json_layout(data: &Value) -> Vec<UINode> {
    let mut nodes = Vec::new();
    match data {
        Value::Array(items) => {
            for item in items {
                walk_json_node(item, &mut nodes);
            }
        }
        _ => walk_json_node(data, &mut nodes),
    }
    nodes
}

fn walk_json_node(node: &Value, out: &mut Vec<UINode>) {
    let Some(map) = node.as_object() else { return };
    let attrs = map
        .get("attributes")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let attr_str = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|k| attrs.get(*k).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string()
    };

    let bounds_raw = attr_str(&["bounds", "origBounds"]);
    if let Some(bounds) = parse_bounds(&bounds_raw) {
        let clickable = match attrs.get("clickable") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        };
        out.push(UINode {
            text: attr_str(&["text"]),
            resource_id: attr_str(&["id", "resourceId"]),
            content_desc: attr_str(&["description", "accessibilityId", "contentDesc"]),
            class_name: attr_str(&["type", "class"]),
            clickable,
            bounds,
        });
    }

    match map.get("children") {
        Some(Value::Array(children)) => {
            for child in children {
                walk_json_node(child, out);
            }
        }
        Some(Value::Object(children)) => {
            for child in children.values() {
                walk_json_node(child, out);
            }
        }
        _ => {}
    }
}

/// Parse a raw UI dump, sniffing the dialect from the first character.
pub fn parse_ui_dump(raw: &str) -> Vec<UINode> {
    let text = raw.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.starts_with('{') || text.starts_with('[') {
        match serde_json::from_str::<Value>(text) {
            Ok(payload) => parse_json_layout(&payload),
            Err(_) => Vec::new(),
        }
    } else {
        parse_uiautomator_xml(text)
    }
}

/// Collect the text and accessibility descriptions of all nodes.
pub fn extract_texts(nodes: &[UINode]) -> Vec<String> {
    let mut texts = Vec::new();
    for node in nodes {
        if !node.text.is_empty() {
            texts.push(node.text.clone());
        }
        if !node.content_desc.is_empty() {
            texts.push(node.content_desc.clone());
        }
    }
    texts
}

fn match_text(value: &str, target: &str, mode: &str) -> bool {
    match mode {
        "exact" => value == target,
        "contains" => value.contains(target),
        "regex" => Regex::new(target)
            .map(|re| re.is_match(value))
            .unwrap_or(false),
        _ => false,
    }
}

/// Whether a node satisfies every field of a selector.
pub fn node_matches_selector(node: &UINode, selector: &Value) -> bool {
    let mode = selector
        .get("match")
        .and_then(Value::as_str)
        .unwrap_or("contains");

    let field_ok = |key: &str, value: &str| -> bool {
        match selector.get(key).and_then(Value::as_str) {
            Some(target) if !target.is_empty() => match_text(value, target, mode),
            _ => true,
        }
    };

    if !field_ok("text", &node.text) {
        return false;
    }
    if !field_ok("content_desc", &node.content_desc) {
        return false;
    }
    if !field_ok("resource_id", &node.resource_id) {
        return false;
    }
    if !field_ok("class_name", &node.class_name) {
        return false;
    }
    if selector.get("clickable") == Some(&Value::Bool(true)) && !node.clickable {
        return false;
    }
    true
}

/// All nodes matching a selector, in dump order.
pub fn find_nodes<'a>(nodes: &'a [UINode], selector: &Value) -> Vec<&'a UINode> {
    nodes
        .iter()
        .filter(|node| node_matches_selector(node, selector))
        .collect()
}

/// Break ties among matches: clickable nodes first, then largest area.
/// Equal candidates keep dump order, so resolution stays deterministic.
pub fn pick_best_node<'a>(nodes: &[&'a UINode]) -> Option<&'a UINode> {
    let mut best: Option<&'a UINode> = None;
    for node in nodes {
        let better = match best {
            Some(current) => (node.clickable, node.area()) > (current.clickable, current.area()),
            None => true,
        };
        if better {
            best = Some(node);
        }
    }
    best
}

/// Resolve a selector to a click point.
///
/// A `resource_id` match takes priority over the generic path; an `index`
/// field picks the n-th match instead of the best one. No match yields
/// `None`, which callers surface as TARGET_NOT_FOUND.
pub fn resolve_selector_to_point(nodes: &[UINode], selector: &Value) -> Option<(i32, i32)> {
    let mode = selector
        .get("match")
        .and_then(Value::as_str)
        .unwrap_or("contains");

    if let Some(resource_id) = selector.get("resource_id").and_then(Value::as_str) {
        if !resource_id.is_empty() {
            let matches: Vec<&UINode> = nodes
                .iter()
                .filter(|node| match_text(&node.resource_id, resource_id, mode))
                .collect();
            if let Some(best) = pick_best_node(&matches) {
                return Some(best.center());
            }
        }
    }

    let matches = find_nodes(nodes, selector);
    if matches.is_empty() {
        return None;
    }
    if let Some(index) = selector.get("index").and_then(Value::as_u64) {
        if let Some(node) = matches.get(index as usize) {
            return Some(node.center());
        }
    }
    pick_best_node(&matches).map(|node| node.center())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(text: &str, resource_id: &str, clickable: bool, bounds: (i32, i32, i32, i32)) -> UINode {
        UINode {
            text: text.to_string(),
            resource_id: resource_id.to_string(),
            content_desc: String::new(),
            class_name: "android.widget.Button".to_string(),
            clickable,
            bounds,
        }
    }

    #[test]
    fn test_parse_uiautomator_xml() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<hierarchy rotation="0">
  <node text="Submit" resource-id="com.app:id/btn_submit" content-desc="" class="android.widget.Button" clickable="true" bounds="[100,200][300,260]"/>
  <node text="" resource-id="" content-desc="avatar" class="android.widget.ImageView" clickable="false" bounds="[0,0][96,96]"/>
</hierarchy>"#;
        let nodes = parse_uiautomator_xml(xml);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].text, "Submit");
        assert!(nodes[0].clickable);
        assert_eq!(nodes[0].bounds, (100, 200, 300, 260));
        assert_eq!(nodes[1].content_desc, "avatar");
    }

    #[test]
    fn test_parse_json_layout() {
        let payload = json!({
            "attributes": {"bounds": "[0,0][1080,2400]", "type": "root"},
            "children": [
                {
                    "attributes": {
                        "text": "Play",
                        "id": "btn_play",
                        "clickable": "true",
                        "bounds": "[40,60][200,120]"
                    },
                    "children": []
                }
            ]
        });
        let nodes = parse_json_layout(&payload);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].resource_id, "btn_play");
        assert!(nodes[1].clickable);
        assert_eq!(nodes[1].center(), (120, 90));
    }

    #[test]
    fn test_parse_ui_dump_sniffs_dialect() {
        assert!(parse_ui_dump("").is_empty());
        assert!(parse_ui_dump("{not json").is_empty());
        let nodes = parse_ui_dump(r#"<node text="x" bounds="[0,0][10,10]"/>"#);
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_selector_matching_modes() {
        let button = node("Confirm order", "com.app:id/confirm", true, (0, 0, 10, 10));
        assert!(node_matches_selector(&button, &json!({"text": "Confirm"})));
        assert!(!node_matches_selector(
            &button,
            &json!({"text": "Confirm", "match": "exact"})
        ));
        assert!(node_matches_selector(
            &button,
            &json!({"text": "^Confirm", "match": "regex"})
        ));
        // Invalid pattern counts as non-match, not an error.
        assert!(!node_matches_selector(
            &button,
            &json!({"text": "(", "match": "regex"})
        ));
        assert!(!node_matches_selector(&button, &json!({"text": "Cancel"})));
    }

    #[test]
    fn test_resolve_prefers_clickable_resource_id_match() {
        let nodes = vec![
            node("Submit", "btn_submit", false, (0, 0, 400, 400)),
            node("Submit", "btn_submit", true, (500, 500, 600, 560)),
        ];
        let point = resolve_selector_to_point(&nodes, &json!({"resource_id": "btn_submit"}));
        assert_eq!(point, Some((550, 530)));
    }

    #[test]
    fn test_resolve_index_override() {
        let nodes = vec![
            node("Item", "", false, (0, 0, 100, 40)),
            node("Item", "", false, (0, 50, 100, 90)),
        ];
        let point = resolve_selector_to_point(&nodes, &json!({"text": "Item", "index": 1}));
        assert_eq!(point, Some((50, 70)));
    }

    #[test]
    fn test_resolve_no_match() {
        let nodes = vec![node("Item", "", false, (0, 0, 100, 40))];
        assert_eq!(
            resolve_selector_to_point(&nodes, &json!({"text": "Nope"})),
            None
        );
    }

    #[test]
    fn test_extract_texts() {
        let mut with_desc = node("Play", "", false, (0, 0, 1, 1));
        with_desc.content_desc = "play button".to_string();
        let texts = extract_texts(&[with_desc, node("", "", false, (0, 0, 1, 1))]);
        assert_eq!(texts, vec!["Play", "play button"]);
    }
}
