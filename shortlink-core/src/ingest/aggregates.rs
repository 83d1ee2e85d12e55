use std::collections::HashMap;

use crate::models::ClickEvent;

/// Click deltas accumulated within one poll iteration, keyed by short
/// code. Addition is order-free, so replays from the fallback stream
/// fold in the same way as broker records.
#[derive(Debug, Default)]
pub struct ClickAggregates {
    by_short_code: HashMap<String, i64>,
}

impl ClickAggregates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, short_code: &str, delta: i64) {
        *self.by_short_code.entry(short_code.to_string()).or_insert(0) += delta;
    }

    pub fn add_event(&mut self, event: &ClickEvent) {
        self.add(&event.short_code, event.delta);
    }

    /// Distinct short codes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_short_code.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_short_code.is_empty()
    }

    /// Sum of all deltas.
    #[must_use]
    pub fn total(&self) -> i64 {
        self.by_short_code.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.by_short_code.iter()
    }

    #[must_use]
    pub fn into_deltas(self) -> Vec<(String, i64)> {
        self.by_short_code.into_iter().collect()
    }

    /// Rebuild from the raw `HGETALL` of an aggregation hash, dropping
    /// unparseable or non-positive entries.
    #[must_use]
    pub fn from_raw_hash(raw: HashMap<String, String>) -> Self {
        let mut aggregates = Self::new();
        for (code, delta_str) in raw {
            match delta_str.parse::<i64>() {
                Ok(delta) if delta > 0 => aggregates.add(&code, delta),
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(short_code = %code, raw = %delta_str, "unparseable delta in agg hash");
                }
            }
        }
        aggregates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_accumulate_per_code() {
        let mut agg = ClickAggregates::new();
        agg.add("a", 1);
        agg.add("b", 2);
        agg.add("a", 3);

        assert_eq!(agg.len(), 2);
        assert_eq!(agg.total(), 6);

        let mut deltas = agg.into_deltas();
        deltas.sort();
        assert_eq!(deltas, vec![("a".to_string(), 4), ("b".to_string(), 2)]);
    }

    #[test]
    fn events_fold_in() {
        let mut agg = ClickAggregates::new();
        agg.add_event(&ClickEvent::single("x"));
        agg.add_event(&ClickEvent {
            short_code: "x".to_string(),
            delta: 4,
        });
        assert_eq!(agg.total(), 5);
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn raw_hash_parsing_drops_junk() {
        let mut raw = HashMap::new();
        raw.insert("good".to_string(), "7".to_string());
        raw.insert("zero".to_string(), "0".to_string());
        raw.insert("negative".to_string(), "-3".to_string());
        raw.insert("junk".to_string(), "NaN".to_string());

        let agg = ClickAggregates::from_raw_hash(raw);
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.total(), 7);
    }
}
