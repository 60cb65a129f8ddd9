//! Per-day nutrition totals computed from a pulled server state.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::api::{Entry, EntryProduct, MealType, NutrientSet, ServerState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
  pub date: NaiveDate,
  pub entries: usize,
  pub by_meal: BTreeMap<MealType, NutrientSet>,
  pub totals: NutrientSet,
  pub goals: NutrientSet,
  /// Goals minus totals; negative when over
  pub remaining: NutrientSet,
}

impl DailySummary {
  pub fn for_date(state: &ServerState, date: NaiveDate) -> Self {
    let mut by_meal: BTreeMap<MealType, NutrientSet> = BTreeMap::new();
    let mut totals = NutrientSet::default();
    let mut entries = 0;

    for entry in state.entries.iter().filter(|e| e.date == date) {
      let nutrition = entry_nutrition(state, entry);
      *by_meal.entry(entry.meal_type).or_default() += nutrition;
      totals += nutrition;
      entries += 1;
    }

    let totals = totals.rounded();
    Self {
      date,
      entries,
      by_meal: by_meal.into_iter().map(|(k, v)| (k, v.rounded())).collect(),
      totals,
      goals: state.goals,
      remaining: (state.goals - totals).rounded(),
    }
  }
}

/// Nutrition carried on the entry, or derived from its product. Entries
/// whose product is unknown count as zero.
fn entry_nutrition(state: &ServerState, entry: &Entry) -> NutrientSet {
  if let Some(nutrition) = entry.nutrition {
    return nutrition;
  }

  match &entry.product {
    EntryProduct::Inline { product } => product.nutrition_for_weight(entry.weight),
    EntryProduct::Catalog { product_id } => state
      .find_product(product_id)
      .map(|p| p.nutrition_for_weight(entry.weight))
      .unwrap_or_else(|| {
        tracing::debug!(%product_id, "Entry references unknown product");
        NutrientSet::default()
      }),
  }
}
