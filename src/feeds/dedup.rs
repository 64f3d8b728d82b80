use std::cmp::Reverse;

use chrono::{DateTime, Utc};

use super::types::{FeedItem, FeedWatermark};

/// Which comparison decided an item's fate. First applicable rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Id,
    PublishDate,
    Title,
    NoBasis,
}

fn rule_for(item: &FeedItem, watermark: &FeedWatermark) -> Rule {
    if item.id.is_some() && watermark.last_item_id.is_some() {
        Rule::Id
    } else if item.published.is_some() && watermark.last_publish_date.is_some() {
        Rule::PublishDate
    } else if item.title.is_some() && watermark.last_title.is_some() {
        Rule::Title
    } else {
        Rule::NoBasis
    }
}

/// Where an item sits in the fetched list, and where the watermark's own
/// item sits when it is still listed. Feeds list newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    index: usize,
    anchor: Option<usize>,
}

fn anchor_index(items: &[FeedItem], watermark: Option<&FeedWatermark>) -> Option<usize> {
    let last_id = watermark?.last_item_id.as_deref()?;
    items.iter().position(|item| item.id.as_deref() == Some(last_id))
}

/// Decide whether a single item comes after the watermark.
fn is_new(item: &FeedItem, placement: Placement, watermark: Option<&FeedWatermark>) -> bool {
    let Some(watermark) = watermark else {
        return true;
    };

    match rule_for(item, watermark) {
        Rule::Id => {
            if item.id == watermark.last_item_id {
                return false;
            }
            match (item.published_at(), watermark.last_publish_date) {
                // A different guid that is provably older was already passed
                // over when the watermark advanced.
                (Some(at), Some(last)) if at != last => at > last,
                // Same instant or no usable dates: feed order decides.
                _ => placement.anchor.map_or(true, |anchor| placement.index < anchor),
            }
        }
        // Unparseable dates never count as newer.
        Rule::PublishDate => match (item.published_at(), watermark.last_publish_date) {
            (Some(at), Some(last)) => at > last,
            _ => false,
        },
        Rule::Title => item.title != watermark.last_title,
        Rule::NoBasis => true,
    }
}

fn effective_time(item: &FeedItem) -> DateTime<Utc> {
    // Missing or broken dates sort as the epoch, i.e. first.
    item.published_at().unwrap_or_default()
}

/// Filter `items` down to the ones not yet dispatched, oldest first.
///
/// Items sharing a publish time are taken in reverse feed order, so the
/// newest-listed one is dispatched last and becomes the watermark.
pub fn select_new_items(items: Vec<FeedItem>, watermark: Option<&FeedWatermark>) -> Vec<FeedItem> {
    let anchor = anchor_index(&items, watermark);
    let mut fresh: Vec<(usize, FeedItem)> = items
        .into_iter()
        .enumerate()
        .filter(|(index, item)| {
            let placement = Placement {
                index: *index,
                anchor,
            };
            is_new(item, placement, watermark)
        })
        .collect();
    fresh.sort_by_key(|(index, item)| (effective_time(item), Reverse(*index)));
    fresh.into_iter().map(|(_, item)| item).collect()
}

/// The watermark that represents `item` once it has been dispatched.
pub fn watermark_for(item: &FeedItem) -> FeedWatermark {
    FeedWatermark {
        last_item_id: item.id.clone(),
        last_publish_date: item.published_at(),
        last_title: item.title.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: Option<&str>, date: Option<&str>, title: Option<&str>) -> FeedItem {
        FeedItem {
            id: id.map(str::to_string),
            published: date.map(str::to_string),
            title: title.map(str::to_string),
            link: Some("https://example.com/a".to_string()),
            ..Default::default()
        }
    }

    const D1: &str = "Mon, 01 Jan 2024 10:00:00 GMT";
    const D2: &str = "Tue, 02 Jan 2024 10:00:00 GMT";
    const D3: &str = "Wed, 03 Jan 2024 10:00:00 GMT";

    fn unanchored(item: &FeedItem, watermark: Option<&FeedWatermark>) -> bool {
        let placement = Placement {
            index: 0,
            anchor: None,
        };
        is_new(item, placement, watermark)
    }

    /// Run `cycles` passes against an unchanged feed, advancing the watermark
    /// the way the poller does. Returns the ids picked on each pass.
    fn run_cycles(feed: &[FeedItem], cycles: usize) -> Vec<Vec<String>> {
        let mut mark: Option<FeedWatermark> = None;
        let mut passes = Vec::new();
        for _ in 0..cycles {
            let fresh = select_new_items(feed.to_vec(), mark.as_ref());
            if let Some(last) = fresh.last() {
                mark = Some(watermark_for(last));
            }
            passes.push(
                fresh
                    .iter()
                    .map(|i| i.id.clone().unwrap_or_default())
                    .collect(),
            );
        }
        passes
    }

    fn ids(items: &[FeedItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_deref().unwrap_or("-")).collect()
    }

    #[test]
    fn test_first_run_takes_everything_oldest_first() {
        let feed = vec![
            item(Some("c"), Some(D3), Some("C")),
            item(Some("a"), Some(D1), Some("A")),
            item(Some("b"), Some(D2), Some("B")),
        ];
        let fresh = select_new_items(feed, None);
        assert_eq!(ids(&fresh), vec!["a", "b", "c"]);

        let mark = watermark_for(fresh.last().unwrap());
        assert_eq!(mark.last_item_id.as_deref(), Some("c"));
        assert_eq!(mark.last_title.as_deref(), Some("C"));
        assert_eq!(mark.last_publish_date, crate::feeds::types::parse_date(D3));
    }

    #[test]
    fn test_watermark_in_the_middle_yields_only_newer() {
        let b = item(Some("b"), Some(D2), Some("B"));
        let mark = watermark_for(&b);
        let feed = vec![
            item(Some("a"), Some(D1), Some("A")),
            b,
            item(Some("c"), Some(D3), Some("C")),
        ];
        let fresh = select_new_items(feed, Some(&mark));
        assert_eq!(ids(&fresh), vec!["c"]);
    }

    #[test]
    fn test_same_id_never_reappears() {
        let a = item(Some("a"), None, Some("A"));
        let mark = watermark_for(&a);
        for _ in 0..3 {
            let fresh = select_new_items(vec![a.clone()], Some(&mark));
            assert!(fresh.is_empty());
        }
    }

    #[test]
    fn test_id_rule_without_dates_is_plain_inequality() {
        let mark = FeedWatermark {
            last_item_id: Some("x".to_string()),
            ..Default::default()
        };
        assert!(unanchored(&item(Some("y"), None, None), Some(&mark)));
        assert!(!unanchored(&item(Some("x"), None, None), Some(&mark)));
        assert_eq!(rule_for(&item(Some("y"), None, None), &mark), Rule::Id);
    }

    #[test]
    fn test_missing_id_falls_through_to_date() {
        let mark = watermark_for(&item(Some("b"), Some(D2), Some("B")));
        let older = item(None, Some(D1), Some("A"));
        let same = item(None, Some(D2), Some("B2"));
        let newer = item(None, Some(D3), Some("C"));
        assert_eq!(rule_for(&older, &mark), Rule::PublishDate);
        assert!(!unanchored(&older, Some(&mark)));
        assert!(!unanchored(&same, Some(&mark)));
        assert!(unanchored(&newer, Some(&mark)));
    }

    #[test]
    fn test_unparseable_date_is_not_new() {
        let mark = watermark_for(&item(None, Some(D2), Some("B")));
        let broken = item(None, Some("sometime last week"), Some("Z"));
        assert!(!unanchored(&broken, Some(&mark)));
    }

    #[test]
    fn test_title_match_without_guid_is_not_new() {
        let mark = FeedWatermark {
            last_item_id: Some("guid-1".to_string()),
            last_publish_date: None,
            last_title: Some("Race results".to_string()),
        };
        let same = item(None, None, Some("Race results"));
        let other = item(None, None, Some("Entries announced"));
        assert_eq!(rule_for(&same, &mark), Rule::Title);
        assert!(!unanchored(&same, Some(&mark)));
        assert!(unanchored(&other, Some(&mark)));
    }

    #[test]
    fn test_nothing_comparable_is_new() {
        let mark = FeedWatermark {
            last_title: Some("T".to_string()),
            ..Default::default()
        };
        let bare = item(None, Some(D1), None);
        assert_eq!(rule_for(&bare, &mark), Rule::NoBasis);
        assert!(unanchored(&bare, Some(&mark)));
    }

    #[test]
    fn test_output_sorted_with_undated_first() {
        let feed = vec![
            item(Some("3"), Some(D3), None),
            item(Some("u"), None, None),
            item(Some("1"), Some(D1), None),
            item(Some("bad"), Some("garbage"), None),
            item(Some("2"), Some(D2), None),
        ];
        let fresh = select_new_items(feed, None);
        // Both undated items sort as the epoch; the later-listed one goes first.
        assert_eq!(ids(&fresh), vec!["bad", "u", "1", "2", "3"]);
        let times: Vec<_> = fresh.iter().map(effective_time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_second_pass_after_advancing_is_empty() {
        let feed = vec![
            item(Some("a"), Some(D1), Some("A")),
            item(Some("b"), Some(D2), Some("B")),
        ];
        let fresh = select_new_items(feed.clone(), None);
        let mark = watermark_for(fresh.last().unwrap());
        assert!(select_new_items(feed.clone(), Some(&mark)).is_empty());
        assert!(select_new_items(feed, Some(&mark)).is_empty());
    }

    #[test]
    fn test_advanced_watermark_never_goes_backwards() {
        let mark = watermark_for(&item(Some("b"), Some(D2), Some("B")));
        let feed = vec![
            item(Some("a"), Some(D1), Some("A")),
            item(Some("c"), Some(D3), Some("C")),
        ];
        let fresh = select_new_items(feed, Some(&mark));
        let next = watermark_for(fresh.last().unwrap());
        assert!(next.last_publish_date >= mark.last_publish_date);
    }

    #[test]
    fn test_same_timestamp_items_settle_after_one_pass() {
        let feed = vec![
            item(Some("q"), Some(D1), Some("Q")),
            item(Some("p"), Some(D1), Some("P")),
        ];
        let passes = run_cycles(&feed, 4);
        assert_eq!(passes[0], vec!["p", "q"]);
        assert!(passes[1..].iter().all(Vec::is_empty));
    }

    #[test]
    fn test_undated_guids_settle_after_one_pass() {
        let feed = vec![item(Some("u2"), None, Some("U2")), item(Some("u1"), None, Some("U1"))];
        let passes = run_cycles(&feed, 4);
        assert_eq!(passes[0], vec!["u1", "u2"]);
        assert!(passes[1..].iter().all(Vec::is_empty));
    }

    #[test]
    fn test_new_undated_item_above_watermark_is_picked_up() {
        let mark = watermark_for(&item(Some("u2"), None, Some("U2")));
        let feed = vec![
            item(Some("u3"), None, Some("U3")),
            item(Some("u2"), None, Some("U2")),
            item(Some("u1"), None, Some("U1")),
        ];
        let fresh = select_new_items(feed.clone(), Some(&mark));
        assert_eq!(ids(&fresh), vec!["u3"]);

        let next = watermark_for(fresh.last().unwrap());
        assert!(select_new_items(feed, Some(&next)).is_empty());
    }

    #[test]
    fn test_same_timestamp_new_item_above_watermark() {
        let mark = watermark_for(&item(Some("q"), Some(D1), Some("Q")));
        let feed = vec![
            item(Some("r"), Some(D1), Some("R")),
            item(Some("q"), Some(D1), Some("Q")),
            item(Some("p"), Some(D1), Some("P")),
        ];
        assert_eq!(ids(&select_new_items(feed, Some(&mark))), vec!["r"]);
    }

    #[test]
    fn test_watermark_item_gone_keeps_id_inequality() {
        let mark = watermark_for(&item(Some("gone"), None, Some("Gone")));
        let feed = vec![item(Some("b"), None, None), item(Some("a"), None, None)];
        assert_eq!(ids(&select_new_items(feed, Some(&mark))), vec!["a", "b"]);
    }

    #[test]
    fn test_mixed_dated_feed_is_idempotent() {
        let feed = vec![
            item(Some("c"), Some(D3), Some("C")),
            item(Some("b2"), Some(D2), Some("B2")),
            item(Some("b1"), Some(D2), Some("B1")),
            item(Some("x"), None, Some("X")),
            item(Some("a"), Some(D1), Some("A")),
        ];
        let passes = run_cycles(&feed, 3);
        assert_eq!(passes[0], vec!["x", "a", "b1", "b2", "c"]);
        assert!(passes[1].is_empty());
        assert!(passes[2].is_empty());
    }
}
