//! Destination catalogue: raw destinations filtered into categories.

use std::collections::{BTreeMap, BTreeSet};

use liveability_region_models::{DestinationCategory, DestinationFeature, RawDestination};

/// Features per category, deduplicated and indexed `0..n`.
#[derive(Debug, Clone, Default)]
pub struct DestinationCatalogue {
    features: BTreeMap<String, Vec<DestinationFeature>>,
}

impl DestinationCatalogue {
    /// Admits every raw destination into each category whose inclusion
    /// rule it satisfies.
    ///
    /// Within a category, a destination repeating an earlier source id or
    /// an earlier coordinate (to the centimetre) is dropped. Raw
    /// destinations are visited in `(source_id, x, y)` order so the running
    /// index does not depend on input order.
    #[must_use]
    pub fn compile(categories: &[DestinationCategory], raw: &[RawDestination]) -> Self {
        let mut ordered = raw.iter().collect::<Vec<_>>();
        ordered.sort_by(|a, b| {
            a.source_id
                .cmp(&b.source_id)
                .then_with(|| a.x.total_cmp(&b.x))
                .then_with(|| a.y.total_cmp(&b.y))
        });

        let mut features = BTreeMap::new();
        for category in categories {
            let mut seen_ids = BTreeSet::new();
            let mut seen_coords = BTreeSet::new();
            let mut admitted: Vec<DestinationFeature> = Vec::new();

            for destination in &ordered {
                if !category.include.matches(&destination.attributes) {
                    continue;
                }
                let coord_key = centimetre_key(destination.x, destination.y);
                if seen_ids.contains(destination.source_id.as_str())
                    || seen_coords.contains(&coord_key)
                {
                    continue;
                }
                seen_ids.insert(destination.source_id.as_str());
                seen_coords.insert(coord_key);
                let Ok(id) = u32::try_from(admitted.len()) else {
                    log::warn!(
                        "Category '{}' exceeds the feature index range, truncating",
                        category.name
                    );
                    break;
                };
                admitted.push(DestinationFeature {
                    id,
                    category: category.name.clone(),
                    source_id: destination.source_id.clone(),
                    x: destination.x,
                    y: destination.y,
                });
            }

            log::info!(
                "Category '{}': {} features from {} destinations",
                category.name,
                admitted.len(),
                raw.len()
            );
            features.insert(category.name.clone(), admitted);
        }

        Self { features }
    }

    /// Features of one category; empty for unknown categories.
    #[must_use]
    pub fn features(&self, category: &str) -> &[DestinationFeature] {
        self.features.get(category).map_or(&[], Vec::as_slice)
    }

    /// Category names with their features, ascending by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[DestinationFeature])> {
        self.features
            .iter()
            .map(|(name, features)| (name.as_str(), features.as_slice()))
    }

    /// Categories with no features in the region.
    #[must_use]
    pub fn unavailable(&self) -> Vec<String> {
        self.features
            .iter()
            .filter(|(_, features)| features.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn centimetre_key(x: f64, y: f64) -> (i64, i64) {
    ((x * 100.0).round() as i64, (y * 100.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use liveability_region_models::{DestinationDomain, InclusionRule};

    use super::*;

    fn destination(source_id: &str, x: f64, y: f64, shop: &str) -> RawDestination {
        RawDestination {
            source_id: source_id.to_string(),
            x,
            y,
            attributes: BTreeMap::from([("shop".to_string(), shop.to_string())]),
        }
    }

    fn supermarkets() -> DestinationCategory {
        DestinationCategory {
            name: "supermarket".to_string(),
            domain: DestinationDomain::Food,
            cutoff_m: 1_000.0,
            count_cutoff: 1,
            include: InclusionRule::Equals {
                attribute: "shop".to_string(),
                value: "supermarket".to_string(),
            },
        }
    }

    #[test]
    fn filters_and_indexes_contiguously() {
        let raw = vec![
            destination("b", 10.0, 0.0, "supermarket"),
            destination("a", 0.0, 0.0, "supermarket"),
            destination("c", 20.0, 0.0, "bakery"),
        ];
        let catalogue = DestinationCatalogue::compile(&[supermarkets()], &raw);
        let features = catalogue.features("supermarket");

        assert_eq!(features.len(), 2);
        assert_eq!(features[0].source_id, "a");
        assert_eq!(features.iter().map(|f| f.id).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn deduplicates_by_source_id_and_coordinate() {
        let raw = vec![
            destination("a", 0.0, 0.0, "supermarket"),
            destination("a", 50.0, 0.0, "supermarket"),
            destination("b", 0.001, 0.002, "supermarket"),
            destination("c", 0.02, 0.0, "supermarket"),
        ];
        let catalogue = DestinationCatalogue::compile(&[supermarkets()], &raw);
        let ids = catalogue
            .features("supermarket")
            .iter()
            .map(|f| f.source_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn empty_category_is_unavailable() {
        let raw = vec![destination("a", 0.0, 0.0, "bakery")];
        let catalogue = DestinationCatalogue::compile(&[supermarkets()], &raw);
        assert_eq!(catalogue.unavailable(), vec!["supermarket".to_string()]);
        assert!(catalogue.features("unknown").is_empty());
    }
}
