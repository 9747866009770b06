//! Shared domain types that cross module boundaries (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Queue priority (§3 `QueueEntry`). `Ord` ranks `High` above `Normal` above
/// `Low` so a max-heap keyed on `(Priority, Reverse(enqueued_at))` pops the
/// right entry first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// One sticker slot on an item, as reported by the game transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    pub slot: u32,
    pub sticker_id: u32,
    pub offset_x: f64,
    pub offset_y: f64,
    pub offset_z: f64,
    pub rotation: f64,
    pub wear: Option<f64>,
}

/// One keychain slot on an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keychain {
    pub slot: u32,
    pub sticker_id: u32,
    pub offset_x: f64,
    pub offset_y: f64,
    pub offset_z: f64,
}

/// The result of one protocol round-trip against the game transport.
///
/// The real transport yields a loosely-typed record; known fields are
/// pulled out, anything else lands in `extra` so the formatter can still
/// project forward-compatible fields into the response without the core
/// needing to know about them (§9 design notes: "dynamic result shape").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectResult {
    pub asset_id: u64,
    pub def_index: u32,
    pub paint_index: u32,
    pub rarity: u32,
    pub quality: u32,
    pub paint_seed: Option<u32>,
    pub paint_wear: Option<f64>,
    pub quest_id: Option<u32>,
    pub origin: u32,
    pub owner_id: Option<String>,
    pub stickers: Vec<Sticker>,
    pub keychains: Vec<Keychain>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Persisted, upserted-by-`uniqueId` asset row (§3 `AssetRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub unique_id: String,
    pub asset_id: u64,
    pub def_index: u32,
    pub paint_index: u32,
    pub rarity: u32,
    pub quality: u32,
    pub paint_seed: Option<u32>,
    pub paint_wear: Option<f64>,
    pub quest_id: Option<u32>,
    pub origin: u32,
    pub owner_id: Option<String>,
    pub stickers: Vec<Sticker>,
    pub keychains: Vec<Keychain>,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Classification applied by the history classifier (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEventType {
    TradedUp,
    Dropped,
    PurchasedIngame,
    Unboxed,
    Crafted,
    Unknown,
    Trade,
    MarketBuy,
    MarketListing,
    StickerApply,
    StickerRemove,
    StickerChange,
    StickerScrape,
    KeychainAdded,
    KeychainRemoved,
    KeychainChanged,
}

/// Append-only history row (§3 `HistoryRecord`), unique on `(unique_id, asset_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub unique_id: String,
    pub asset_id: u64,
    pub event_type: HistoryEventType,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Derive the asset upsert key: an 8-hex-digit prefix of
/// `SHA1("{paintSeed}-{paintIndex}-{paintWear}-{defIndex}")`, with missing
/// (`None`) fields normalized to `0` before hashing (§3, §8 invariant 4).
pub fn derive_unique_id(
    paint_seed: Option<u32>,
    paint_index: u32,
    paint_wear: Option<f64>,
    def_index: u32,
) -> String {
    let seed = paint_seed.unwrap_or(0);
    let wear = paint_wear.unwrap_or(0.0);
    let canonical = format!("{seed}-{paint_index}-{wear}-{def_index}");
    let digest = Sha1::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in &digest[..4] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_is_eight_hex_chars() {
        let id = derive_unique_id(Some(661), 44, Some(0.07), 7);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn unique_id_is_deterministic() {
        let a = derive_unique_id(Some(1), 2, Some(0.5), 3);
        let b = derive_unique_id(Some(1), 2, Some(0.5), 3);
        assert_eq!(a, b);
    }

    #[test]
    fn null_fields_normalize_to_zero() {
        let with_none = derive_unique_id(None, 44, None, 7);
        let with_zero = derive_unique_id(Some(0), 44, Some(0.0), 7);
        assert_eq!(with_none, with_zero);
    }
}
