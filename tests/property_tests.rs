//! Property-based tests for the path, text and market helpers
//!
//! These tests verify invariants that should hold for all inputs.

use astrbot_mcp::jsonpath::{
    get_node, parse_path_str, set_value, to_dot, to_pointer, PathError, PathSegment, MAX_INDEX_PADDING,
};
use astrbot_mcp::logparse::strip_ansi;
use astrbot_mcp::market::{build_listing, MarketMode, MarketQuery};
use astrbot_mcp::message::shorten;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn segment() -> impl Strategy<Value = PathSegment> {
    prop_oneof![
        "[a-z_]{1,8}".prop_map(PathSegment::Key),
        (0usize..50).prop_map(PathSegment::Index),
    ]
}

// ==================== Path Property Tests ====================

proptest! {
    /// Property: dot paths survive a print/parse cycle
    #[test]
    fn test_dot_path_round_trip(path in prop::collection::vec(segment(), 1..6)) {
        prop_assert_eq!(parse_path_str(&to_dot(&path)).unwrap(), path);
    }

    /// Property: JSON Pointers escape `/` and `~` inside keys
    #[test]
    fn test_pointer_round_trip(keys in prop::collection::vec("[a-z~/]{0,5}[a-z]", 1..5)) {
        let path: Vec<PathSegment> = keys.into_iter().map(PathSegment::Key).collect();
        let pointer = to_pointer(&path);
        prop_assert!(pointer.starts_with('/'));
        prop_assert_eq!(parse_path_str(&pointer).unwrap(), path);
    }

    /// Property: a value set with create_missing can be read back
    #[test]
    fn test_set_then_get(keys in prop::collection::vec("[a-z]{1,6}", 1..5), n in any::<i64>()) {
        let path: Vec<PathSegment> = keys.into_iter().map(PathSegment::Key).collect();
        let mut root = json!({});
        set_value(&mut root, &path, json!(n), true).unwrap();
        prop_assert_eq!(get_node(&root, &path).unwrap(), &json!(n));
    }

    /// Property: indexed writes pad nearby gaps and refuse far ones without panicking
    #[test]
    fn test_indexed_write_is_bounded(len in 0usize..8, idx in prop_oneof![0usize..2048, any::<usize>()]) {
        let mut root = json!({"list": vec![Value::Null; len]});
        let path = vec![PathSegment::from("list"), PathSegment::Index(idx), PathSegment::from("id")];
        let result = set_value(&mut root, &path, json!("x"), true);
        if idx < len + MAX_INDEX_PADDING {
            prop_assert!(result.is_ok());
            prop_assert_eq!(root["list"].as_array().unwrap().len(), len.max(idx + 1));
        } else {
            prop_assert_eq!(result.unwrap_err(), PathError::IndexOutOfRange(idx));
            prop_assert_eq!(root["list"].as_array().unwrap().len(), len);
        }
    }
}

// ==================== Text Property Tests ====================

proptest! {
    /// Property: shortened text never exceeds the requested width
    #[test]
    fn test_shorten_fits_width(text in "[a-z ]{0,200}", width in 1usize..80) {
        prop_assert!(shorten(&text, width).chars().count() <= width);
    }

    /// Property: stripping ANSI codes twice changes nothing
    #[test]
    fn test_strip_ansi_idempotent(text in "(\u{1b}\\[[0-9;]{0,4}m|[a-z \\[\\]:]){0,40}") {
        let once = strip_ansi(&text);
        prop_assert!(!once.contains('\x1b'));
        prop_assert_eq!(strip_ansi(&once), once.clone());
    }
}

// ==================== Market Property Tests ====================

proptest! {
    /// Property: a page never exceeds `count` and ranks are contiguous from `start`
    #[test]
    fn test_market_page_bounds(total in 0usize..40, start in 1usize..50, count in 1usize..30) {
        let mut registry = Map::new();
        for i in 0..total {
            registry.insert(format!("plugin_{:02}", i), json!({"name": format!("p{}", i), "stars": i}));
        }
        let query = MarketQuery { mode: MarketMode::Latest, query: None, start, count };
        let listing = build_listing(&Value::Object(registry), &query, "astrbot");

        let plugins = listing["plugins"].as_array().unwrap();
        prop_assert!(plugins.len() <= count);
        prop_assert_eq!(plugins.len(), total.saturating_sub(start - 1).min(count));
        for (i, plugin) in plugins.iter().enumerate() {
            prop_assert_eq!(plugin["rank"].as_u64().unwrap() as usize, start + i);
        }
    }
}
