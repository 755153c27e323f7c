//! Candidate generation for one session from top-K co-visitation mappings.

use hashbrown::{HashMap, HashSet};

use crate::covisitation::topk::TopKMapping;
use crate::dataframeutils::{EventTable, SessionView};
use crate::io::{EventType, ItemId};

pub const MAX_CANDIDATES: usize = 20;

/// Unique items in order of first occurrence.
fn unique_in_order<I: IntoIterator<Item = ItemId>>(items: I) -> Vec<ItemId> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(*item)).collect()
}

/// Neighbour items ranked by how often they occur, most frequent first.
/// Ties keep the order of first appearance.
fn most_common(neighbours: &[ItemId]) -> Vec<ItemId> {
    let mut counts: HashMap<ItemId, (usize, usize)> = HashMap::new();
    for (position, item) in neighbours.iter().enumerate() {
        counts.entry(*item).or_insert((0, position)).0 += 1;
    }
    let mut ranked: Vec<(ItemId, usize, usize)> = counts
        .into_iter()
        .map(|(item, (count, first))| (item, count, first))
        .collect();
    ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().map(|(item, _, _)| item).collect()
}

fn neighbours_of(items: &[ItemId], mapping: &TopKMapping) -> Vec<ItemId> {
    items
        .iter()
        .filter_map(|item| mapping.get(item))
        .flatten()
        .copied()
        .collect()
}

/// Observed items first, then co-visited items, then the popularity fallback.
fn fill_candidates(observed: Vec<ItemId>, neighbours: &[ItemId], fallback: &[ItemId]) -> Vec<ItemId> {
    let observed_set: HashSet<ItemId> = observed.iter().copied().collect();
    let mut candidates = observed;
    candidates.truncate(MAX_CANDIDATES);

    let mut taken: HashSet<ItemId> = candidates.iter().copied().collect();
    let co_visited = most_common(neighbours)
        .into_iter()
        .filter(|item| !observed_set.contains(item));
    for item in co_visited.chain(fallback.iter().copied()) {
        if candidates.len() >= MAX_CANDIDATES {
            break;
        }
        if taken.insert(item) {
            candidates.push(item);
        }
    }
    candidates
}

pub fn suggest_clicks(
    session: &SessionView,
    top_clicks_mapping: &TopKMapping,
    top_clicks: &[ItemId],
) -> Vec<ItemId> {
    let observed = unique_in_order(session.items.iter().copied());
    let neighbours = neighbours_of(&observed, top_clicks_mapping);
    fill_candidates(observed, &neighbours, top_clicks)
}

/// Like [`suggest_clicks`], with buy-to-buy neighbours of carted or ordered items
/// appended to the neighbours of all observed items.
pub fn suggest_buys(
    session: &SessionView,
    top_buys_mapping: &TopKMapping,
    top_buy2buy_mapping: &TopKMapping,
    top_orders: &[ItemId],
) -> Vec<ItemId> {
    let observed = unique_in_order(session.items.iter().copied());
    let observed_buys = unique_in_order(
        session
            .items
            .iter()
            .zip(session.types.iter())
            .filter(|(_, event_type)| event_type.is_buy())
            .map(|(item, _)| *item),
    );
    let mut neighbours = neighbours_of(&observed, top_buys_mapping);
    neighbours.extend(neighbours_of(&observed_buys, top_buy2buy_mapping));
    fill_candidates(observed, &neighbours, top_orders)
}

/// The `n` most frequent items among events of one type; ties by item id.
pub fn top_popular(table: &EventTable, event_type: EventType, n: usize) -> Vec<ItemId> {
    let mut counts: HashMap<ItemId, usize> = HashMap::new();
    for (item, _) in table
        .items
        .iter()
        .zip(table.types.iter())
        .filter(|(_, row_type)| **row_type == event_type)
    {
        *counts.entry(*item).or_insert(0) += 1;
    }
    let mut ranked: Vec<(ItemId, usize)> = counts.into_iter().collect();
    ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(item, _)| item).collect()
}

#[cfg(test)]
mod suggest_test {
    use super::*;
    use crate::dataframeutils::dataframeutils_test::event;

    fn mapping(entries: Vec<(ItemId, Vec<ItemId>)>) -> TopKMapping {
        entries.into_iter().collect()
    }

    fn view<'a>(items: &'a [ItemId], types: &'a [EventType], timestamps: &'a [i64]) -> SessionView<'a> {
        SessionView {
            session: 0,
            items,
            timestamps,
            types,
        }
    }

    #[test]
    fn should_pad_with_covisited_then_popular_items() {
        let top_clicks_mapping = mapping(vec![(1, vec![2, 3]), (2, vec![1])]);
        let items = [1];
        let session = view(&items, &[EventType::Clicks], &[0]);
        assert_eq!(
            vec![1, 2, 3, 5, 6, 7],
            suggest_clicks(&session, &top_clicks_mapping, &[5, 6, 7])
        );
    }

    #[test]
    fn should_rank_covisited_items_by_count() {
        let top_clicks_mapping = mapping(vec![(1, vec![7, 8]), (2, vec![8, 9]), (3, vec![9, 8, 1])]);
        let items = [1, 2, 3, 1];
        let types = [EventType::Clicks; 4];
        let session = view(&items, &types, &[0; 4]);
        let suggested = suggest_clicks(&session, &top_clicks_mapping, &[]);
        assert_eq!(vec![1, 2, 3, 8, 9, 7], suggested);
    }

    #[test]
    fn should_truncate_long_sessions_in_first_occurrence_order() {
        let items: Vec<ItemId> = (0..30).rev().collect();
        let types = vec![EventType::Clicks; 30];
        let timestamps = vec![0; 30];
        let session = view(&items, &types, &timestamps);
        let suggested = suggest_clicks(&session, &mapping(vec![(29, vec![100])]), &[200]);
        assert_eq!((10..30).rev().collect::<Vec<_>>(), suggested);
    }

    #[test]
    fn should_use_buy2buy_only_for_buy_events() {
        let top_buys_mapping = mapping(vec![(1, vec![10]), (2, vec![11])]);
        let top_buy2buy_mapping = mapping(vec![(1, vec![20]), (2, vec![21])]);
        let items = [1, 2];
        let types = [EventType::Clicks, EventType::Carts];
        let session = view(&items, &types, &[0, 1]);
        assert_eq!(
            vec![1, 2, 10, 11, 21, 4],
            suggest_buys(&session, &top_buys_mapping, &top_buy2buy_mapping, &[1, 4])
        );
    }

    #[test]
    fn should_rank_popular_items() {
        let table = EventTable::from_events(vec![
            event(0, 3, 0, EventType::Orders),
            event(0, 1, 0, EventType::Clicks),
            event(1, 2, 0, EventType::Orders),
            event(1, 3, 0, EventType::Orders),
            event(2, 1, 0, EventType::Orders),
        ]);
        assert_eq!(vec![3, 1], top_popular(&table, EventType::Orders, 2));
        assert_eq!(vec![1], top_popular(&table, EventType::Clicks, 20));
        assert!(top_popular(&table, EventType::Carts, 20).is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn candidates_are_unique_and_complete(
            items in proptest::collection::vec(0u32..40, 1..30),
            neighbours in proptest::collection::vec(
                (0u32..40, proptest::collection::vec(0u32..60, 0..20)),
                0..20,
            ),
            fallback in proptest::collection::vec(0u32..80, 0..20),
        ) {
            let types = vec![EventType::Clicks; items.len()];
            let timestamps = vec![0; items.len()];
            let session = SessionView { session: 0, items: &items, timestamps: &timestamps, types: &types };
            let top_clicks_mapping: TopKMapping = neighbours.into_iter().collect();

            let suggested = suggest_clicks(&session, &top_clicks_mapping, &fallback);

            let unique: HashSet<ItemId> = suggested.iter().copied().collect();
            prop_assert_eq!(unique.len(), suggested.len());

            let observed: HashSet<ItemId> = items.iter().copied().collect();
            let mut available = observed.clone();
            for item in &items {
                if let Some(found) = top_clicks_mapping.get(item) {
                    available.extend(found.iter().copied());
                }
            }
            available.extend(fallback.iter().copied());
            prop_assert_eq!(available.len().min(MAX_CANDIDATES), suggested.len());
            if observed.len() < MAX_CANDIDATES {
                prop_assert!(observed.iter().all(|item| unique.contains(item)));
            }
        }
    }
}
