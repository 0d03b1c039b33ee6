//! The static fridge catalog.

use serde::Serialize;

/// A fridge that can be bought. Prices and earnings are in whole KES.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogItem {
    /// The catalog id, e.g. `4ft`.
    pub id: &'static str,
    /// The display name.
    pub name: &'static str,
    /// The purchase price.
    pub price: i64,
    /// The amount credited to the owner on every accrual day.
    pub daily_earn: i64,
}

const FRIDGES: &[CatalogItem] = &[
    CatalogItem { id: "2ft", name: "2 ft Fridge", price: 500, daily_earn: 25 },
    CatalogItem { id: "4ft", name: "4 ft Fridge", price: 1000, daily_earn: 55 },
    CatalogItem { id: "6ft", name: "6 ft Fridge", price: 2000, daily_earn: 100 },
    CatalogItem { id: "8ft", name: "8 ft Fridge", price: 4000, daily_earn: 150 },
    CatalogItem { id: "10ft", name: "10 ft Fridge", price: 6000, daily_earn: 250 },
    CatalogItem { id: "12ft", name: "12 ft Fridge", price: 8000, daily_earn: 350 },
];

/// The immutable set of fridges, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Catalog {
    items: Vec<CatalogItem>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(FRIDGES.to_vec())
    }
}

impl Catalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }

    pub fn get(&self, id: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::Catalog;

    #[test]
    fn test_default_catalog() {
        let catalog = Catalog::default();
        assert_eq!(6, catalog.items().len());

        let item = catalog.get("4ft").expect("4ft is in the catalog");
        assert_eq!(1000, item.price);
        assert_eq!(55, item.daily_earn);

        assert!(catalog.get("3ft").is_none());
    }

    #[test]
    fn test_items_are_sorted_by_price() {
        let catalog = Catalog::default();
        let prices: Vec<i64> = catalog.items().iter().map(|i| i.price).collect();
        let mut sorted = prices.clone();
        sorted.sort();
        assert_eq!(sorted, prices);
    }
}
