//! Products whose stock or price must be pushed to a marketplace.
//!
//! A product enters the set when it is marked explicitly or when the catalog
//! flags it dirty with values that differ from the last successful push. It
//! leaves only on a successful push.

use std::collections::{BTreeMap, BTreeSet};

use mps_schemas::MarketplaceId;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pushed {
    qty: i64,
    price: f64,
}

#[derive(Debug, Default)]
pub struct DirtySet {
    pending: BTreeSet<(MarketplaceId, String)>,
    last_pushed: BTreeMap<(MarketplaceId, String), Pushed>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, m: MarketplaceId, sku: impl Into<String>) {
        self.pending.insert((m, sku.into()));
    }

    /// Mark `sku` unless exactly these values were already pushed.
    pub fn mark_if_changed(&mut self, m: MarketplaceId, sku: &str, qty: i64, price: f64) -> bool {
        let key = (m, sku.to_string());
        if self.last_pushed.get(&key) == Some(&Pushed { qty, price }) {
            return false;
        }
        self.pending.insert(key)
    }

    pub fn is_dirty(&self, m: MarketplaceId, sku: &str) -> bool {
        self.pending.contains(&(m, sku.to_string()))
    }

    /// Pending skus of `m`, sorted.
    pub fn pending(&self, m: MarketplaceId) -> Vec<String> {
        self.pending
            .iter()
            .filter(|(pm, _)| *pm == m)
            .map(|(_, sku)| sku.clone())
            .collect()
    }

    pub fn clear_pushed(&mut self, m: MarketplaceId, sku: &str, qty: i64, price: f64) {
        let key = (m, sku.to_string());
        self.pending.remove(&key);
        self.last_pushed.insert(key, Pushed { qty, price });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushed_values_are_not_remarked() {
        let mut d = DirtySet::new();
        let m = MarketplaceId::Trendyol;
        assert!(d.mark_if_changed(m, "A", 3, 10.0));
        d.clear_pushed(m, "A", 3, 10.0);
        assert!(!d.is_dirty(m, "A"));
        assert!(!d.mark_if_changed(m, "A", 3, 10.0));
        assert!(d.mark_if_changed(m, "A", 2, 10.0));
        assert_eq!(d.pending(m), vec!["A"]);
        assert!(d.pending(MarketplaceId::Amazon).is_empty());
    }

    #[test]
    fn explicit_mark_ignores_history() {
        let mut d = DirtySet::new();
        let m = MarketplaceId::N11;
        d.clear_pushed(m, "B", 1, 1.0);
        d.mark(m, "B");
        assert!(d.is_dirty(m, "B"));
        assert_eq!(d.len(), 1);
    }
}
