//! Response formatting (spec §6, non-core). Projects the internal
//! `InspectResult` into the client-facing JSON shapes for `/inspect` and
//! `/float`, grafting forward-compatible fields from `extra` the way
//! `der_headend`'s handlers merge a typed view with whatever the
//! underlying row carries (`models::AssetView`/`SiteView`).

use serde_json::{Value, json};

use crate::descriptor::{InspectDescriptor, format_inspect_link};
use crate::models::InspectResult;

pub fn format_inspect_response(
    result: &InspectResult,
    unique_id: &str,
    descriptor: &InspectDescriptor,
) -> Value {
    let mut body = json!({
        "uniqueId": unique_id,
        "inspectLink": format_inspect_link(descriptor),
        "assetId": result.asset_id,
        "defIndex": result.def_index,
        "paintIndex": result.paint_index,
        "rarity": result.rarity,
        "quality": result.quality,
        "paintSeed": result.paint_seed,
        "paintWear": result.paint_wear,
        "questId": result.quest_id,
        "origin": result.origin,
        "ownerId": result.owner_id,
        "stickers": result.stickers,
        "keychains": result.keychains,
    });
    if let Value::Object(ref mut map) = body {
        for (key, value) in &result.extra {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    body
}

pub fn format_float_response(result: &InspectResult) -> Value {
    json!({
        "paintWear": result.paint_wear,
        "paintSeed": result.paint_seed,
        "defIndex": result.def_index,
        "paintIndex": result.paint_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> InspectDescriptor {
        InspectDescriptor::new(1, 123, 3, 0).unwrap()
    }

    fn sample_result() -> InspectResult {
        InspectResult {
            asset_id: 123,
            def_index: 7,
            paint_index: 44,
            rarity: 4,
            quality: 4,
            paint_seed: Some(661),
            paint_wear: Some(0.07),
            quest_id: None,
            origin: 8,
            owner_id: Some("76561198000000000".into()),
            stickers: vec![],
            keychains: vec![],
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn inspect_response_includes_unique_id_and_core_fields() {
        let body = format_inspect_response(&sample_result(), "abc12345", &sample_descriptor());
        assert_eq!(body["uniqueId"], "abc12345");
        assert_eq!(body["assetId"], 123);
        assert_eq!(body["paintSeed"], 661);
        assert!(
            body["inspectLink"]
                .as_str()
                .unwrap()
                .starts_with("S1A123D3")
        );
    }

    #[test]
    fn float_response_is_a_narrow_projection() {
        let body = format_float_response(&sample_result());
        assert_eq!(body["paintWear"], 0.07);
        assert!(body.get("ownerId").is_none());
    }

    #[test]
    fn extra_fields_are_merged_without_overwriting_known_fields() {
        let mut result = sample_result();
        result.extra.insert("assetId".into(), json!(999));
        result.extra.insert("stattrak".into(), json!(true));
        let body = format_inspect_response(&result, "abc12345", &sample_descriptor());
        assert_eq!(body["assetId"], 123);
        assert_eq!(body["stattrak"], true);
    }
}
