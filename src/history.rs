//! History classifier (spec §4.6). A pure, deterministic function — no
//! direct teacher analogue; grounded purely in the spec's classification
//! rules and tested against the worked scenarios in §8.

use std::collections::HashMap;

use crate::models::{HistoryEventType, Keychain, Sticker};

/// The fields of the most-recently-seen asset record needed to classify a
/// fresh inspect result against it (§4.6's comparison tuple minus the parts
/// the caller already used to look the prior record up).
pub struct PriorAsset {
    pub owner_id: Option<String>,
    pub stickers: Vec<Sticker>,
    pub keychains: Vec<Keychain>,
}

/// Steam-id prefix distinguishing a real player account from a market-proxy
/// owner id (§9 open question: this heuristic will misclassify if a market
/// proxy id happens to share the prefix; preserved as specified, flagged
/// here for review rather than silently "fixed").
const PLAYER_ID_PREFIX: &str = "7656";

fn is_player_id(owner: Option<&str>) -> bool {
    owner
        .map(|id| id.starts_with(PLAYER_ID_PREFIX))
        .unwrap_or(false)
}

fn classify_origin(origin: u32) -> HistoryEventType {
    match origin {
        8 => HistoryEventType::TradedUp,
        4 => HistoryEventType::Dropped,
        1 => HistoryEventType::PurchasedIngame,
        2 => HistoryEventType::Unboxed,
        3 => HistoryEventType::Crafted,
        _ => HistoryEventType::Unknown,
    }
}

/// Classify a fresh inspect result against the prior asset record for the
/// same comparison tuple, if any. First match wins, in the order the spec
/// lists them.
pub fn classify(
    current_owner: Option<&str>,
    current_stickers: &[Sticker],
    current_keychains: &[Keychain],
    origin: u32,
    prior: Option<&PriorAsset>,
) -> HistoryEventType {
    let Some(prior) = prior else {
        return classify_origin(origin);
    };

    if prior.owner_id.as_deref() != current_owner {
        // New owner is a market proxy: the item was just listed, regardless
        // of what the previous owner was.
        if !is_player_id(current_owner) {
            return HistoryEventType::MarketListing;
        }
        // New owner is a player: distinguish a peer trade from a market
        // purchase by what the previous owner was.
        return if is_player_id(prior.owner_id.as_deref()) {
            HistoryEventType::Trade
        } else {
            HistoryEventType::MarketBuy
        };
    }

    if let Some(event) = diff_stickers(current_stickers, &prior.stickers) {
        return event;
    }
    if let Some(event) = diff_keychains(current_keychains, &prior.keychains) {
        return event;
    }

    // Same owner, same stickers, same keychains: nothing changed under the
    // comparison tuple. The spec doesn't name this case explicitly; treat
    // it like a fresh sighting of the same state.
    classify_origin(origin)
}

fn diff_stickers(current: &[Sticker], prior: &[Sticker]) -> Option<HistoryEventType> {
    if current.len() > prior.len() {
        return Some(HistoryEventType::StickerApply);
    }
    if current.len() < prior.len() {
        return Some(HistoryEventType::StickerRemove);
    }

    let prior_by_slot: HashMap<u32, &Sticker> = prior.iter().map(|s| (s.slot, s)).collect();
    let mut mismatch = false;
    let mut scraped = false;

    for sticker in current {
        match prior_by_slot.get(&sticker.slot) {
            Some(prev) => {
                let same_identity = prev.sticker_id == sticker.sticker_id
                    && prev.offset_x == sticker.offset_x
                    && prev.offset_y == sticker.offset_y
                    && prev.offset_z == sticker.offset_z
                    && prev.rotation == sticker.rotation;
                if !same_identity {
                    mismatch = true;
                }
                if prev.sticker_id == sticker.sticker_id
                    && let (Some(prev_wear), Some(cur_wear)) = (prev.wear, sticker.wear)
                    && cur_wear > prev_wear
                {
                    scraped = true;
                }
            }
            None => mismatch = true,
        }
    }

    if scraped {
        Some(HistoryEventType::StickerScrape)
    } else if mismatch {
        Some(HistoryEventType::StickerChange)
    } else {
        None
    }
}

fn diff_keychains(current: &[Keychain], prior: &[Keychain]) -> Option<HistoryEventType> {
    if prior.is_empty() && !current.is_empty() {
        return Some(HistoryEventType::KeychainAdded);
    }
    if !prior.is_empty() && current.is_empty() {
        return Some(HistoryEventType::KeychainRemoved);
    }
    if prior.is_empty() && current.is_empty() {
        return None;
    }

    let mut current_sorted = current.to_vec();
    let mut prior_sorted = prior.to_vec();
    current_sorted.sort_by_key(|k| k.slot);
    prior_sorted.sort_by_key(|k| k.slot);
    if current_sorted == prior_sorted {
        None
    } else {
        Some(HistoryEventType::KeychainChanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sticker(slot: u32, id: u32, wear: Option<f64>) -> Sticker {
        Sticker {
            slot,
            sticker_id: id,
            offset_x: 0.0,
            offset_y: 0.0,
            offset_z: 0.0,
            rotation: 0.0,
            wear,
        }
    }

    #[test]
    fn fresh_unbox_infers_source_from_origin() {
        let event = classify(Some("76561198000000000"), &[], &[], 2, None);
        assert_eq!(event, HistoryEventType::Unboxed);
    }

    #[test]
    fn sticker_applied() {
        let prior = PriorAsset {
            owner_id: Some("76561198000000000".into()),
            stickers: vec![],
            keychains: vec![],
        };
        let current = vec![sticker(0, 100, Some(0.0))];
        let event = classify(Some("76561198000000000"), &current, &[], 2, Some(&prior));
        assert_eq!(event, HistoryEventType::StickerApply);
    }

    #[test]
    fn sticker_scraped() {
        let prior = PriorAsset {
            owner_id: Some("76561198000000000".into()),
            stickers: vec![sticker(0, 202, Some(0.05))],
            keychains: vec![],
        };
        let current = vec![sticker(0, 202, Some(0.30))];
        let event = classify(Some("76561198000000000"), &current, &[], 2, Some(&prior));
        assert_eq!(event, HistoryEventType::StickerScrape);
    }

    #[test]
    fn market_buy_when_prior_owner_is_market_proxy() {
        let prior = PriorAsset {
            owner_id: Some("market-proxy-0".into()),
            stickers: vec![],
            keychains: vec![],
        };
        let event = classify(Some("76561198000000001"), &[], &[], 0, Some(&prior));
        assert_eq!(event, HistoryEventType::MarketBuy);
    }

    #[test]
    fn trade_between_two_players() {
        let prior = PriorAsset {
            owner_id: Some("76561198000000000".into()),
            stickers: vec![],
            keychains: vec![],
        };
        let event = classify(Some("76561198000000099"), &[], &[], 0, Some(&prior));
        assert_eq!(event, HistoryEventType::Trade);
    }

    #[test]
    fn market_listing_when_new_owner_is_proxy() {
        let prior = PriorAsset {
            owner_id: Some("76561198000000000".into()),
            stickers: vec![],
            keychains: vec![],
        };
        let event = classify(Some("market-proxy-1"), &[], &[], 0, Some(&prior));
        assert_eq!(event, HistoryEventType::MarketListing);
    }

    #[test]
    fn keychain_added_and_removed() {
        let prior = PriorAsset {
            owner_id: Some("p".into()),
            stickers: vec![],
            keychains: vec![],
        };
        let keychain = Keychain {
            slot: 0,
            sticker_id: 1,
            offset_x: 0.0,
            offset_y: 0.0,
            offset_z: 0.0,
        };
        let added = classify(
            Some("p"),
            &[],
            std::slice::from_ref(&keychain),
            0,
            Some(&prior),
        );
        assert_eq!(added, HistoryEventType::KeychainAdded);

        let prior_with = PriorAsset {
            owner_id: Some("p".into()),
            stickers: vec![],
            keychains: vec![keychain],
        };
        let removed = classify(Some("p"), &[], &[], 0, Some(&prior_with));
        assert_eq!(removed, HistoryEventType::KeychainRemoved);
    }

    #[test]
    fn classification_is_deterministic() {
        let prior = PriorAsset {
            owner_id: Some("76561198000000000".into()),
            stickers: vec![sticker(0, 1, Some(0.1))],
            keychains: vec![],
        };
        let current = vec![sticker(0, 1, Some(0.2))];
        let a = classify(Some("76561198000000000"), &current, &[], 0, Some(&prior));
        let b = classify(Some("76561198000000000"), &current, &[], 0, Some(&prior));
        assert_eq!(a, b);
    }
}
