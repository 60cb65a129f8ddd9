//! Domain types shared by the local store, the mutation queue and the gateway.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Prefix of client-generated placeholder identifiers.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Daily goals the server falls back to when a user never set their own.
pub const DEFAULT_GOALS: NutrientSet = NutrientSet {
  calories: 2000.0,
  protein: 50.0,
  fat: 65.0,
  carbs: 300.0,
};

/// Check whether a string is a temp id (`temp_` followed by digits).
pub fn is_temp_id(id: &str) -> bool {
  id.strip_prefix(TEMP_ID_PREFIX)
    .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Identifier of a diary entry or product.
///
/// The server issues integer ids; anything created while offline carries a
/// string temp id until the next flush.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
  Server(i64),
  Local(String),
}

impl RecordId {
  /// True if this id was generated locally and never reached the server.
  pub fn is_temp(&self) -> bool {
    matches!(self, Self::Local(id) if is_temp_id(id))
  }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Server(id) => write!(f, "{}", id),
      Self::Local(id) => f.write_str(id),
    }
  }
}

impl FromStr for RecordId {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.is_empty() {
      return Err("id must not be empty".to_string());
    }
    Ok(match s.parse::<i64>() {
      Ok(id) => Self::Server(id),
      Err(_) => Self::Local(s.to_string()),
    })
  }
}

/// Absolute nutrient amounts (kcal and grams).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientSet {
  pub calories: f64,
  pub protein: f64,
  pub fat: f64,
  pub carbs: f64,
}

impl NutrientSet {
  /// Scale every nutrient by `factor`.
  pub fn scaled(self, factor: f64) -> Self {
    Self {
      calories: self.calories * factor,
      protein: self.protein * factor,
      fat: self.fat * factor,
      carbs: self.carbs * factor,
    }
  }

  /// Round every nutrient to one decimal place.
  pub fn rounded(self) -> Self {
    let round = |v: f64| (v * 10.0).round() / 10.0;
    Self {
      calories: round(self.calories),
      protein: round(self.protein),
      fat: round(self.fat),
      carbs: round(self.carbs),
    }
  }
}

impl Add for NutrientSet {
  type Output = Self;

  fn add(self, rhs: Self) -> Self {
    Self {
      calories: self.calories + rhs.calories,
      protein: self.protein + rhs.protein,
      fat: self.fat + rhs.fat,
      carbs: self.carbs + rhs.carbs,
    }
  }
}

impl AddAssign for NutrientSet {
  fn add_assign(&mut self, rhs: Self) {
    *self = *self + rhs;
  }
}

impl Sub for NutrientSet {
  type Output = Self;

  fn sub(self, rhs: Self) -> Self {
    Self {
      calories: self.calories - rhs.calories,
      protein: self.protein - rhs.protein,
      fat: self.fat - rhs.fat,
      carbs: self.carbs - rhs.carbs,
    }
  }
}

/// Meal slot an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
  Breakfast,
  Lunch,
  Dinner,
  Snack,
}

impl FromStr for MealType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "breakfast" => Ok(Self::Breakfast),
      "lunch" => Ok(Self::Lunch),
      "dinner" => Ok(Self::Dinner),
      "snack" => Ok(Self::Snack),
      other => Err(format!(
        "unknown meal type '{}' (expected breakfast, lunch, dinner or snack)",
        other
      )),
    }
  }
}

/// Catalog item with nutrients per 100 g.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<RecordId>,
  pub name: String,
  pub calories: f64,
  pub protein: f64,
  pub fat: f64,
  pub carbs: f64,
  #[serde(default)]
  pub is_recipe: bool,
  #[serde(rename = "_tempId", default, skip_serializing_if = "Option::is_none")]
  pub temp_id: Option<String>,
  #[serde(rename = "_offline", default, skip_serializing_if = "std::ops::Not::not")]
  pub offline: bool,
}

impl Product {
  /// Build a new product from macros, deriving calories the same way the server does.
  pub fn new(name: impl Into<String>, protein: f64, fat: f64, carbs: f64) -> Self {
    Self {
      id: None,
      name: name.into(),
      calories: calculate_calories(protein, fat, carbs),
      protein,
      fat,
      carbs,
      is_recipe: false,
      temp_id: None,
      offline: false,
    }
  }

  pub fn per_100g(&self) -> NutrientSet {
    NutrientSet {
      calories: self.calories,
      protein: self.protein,
      fat: self.fat,
      carbs: self.carbs,
    }
  }

  /// Nutrients for `weight` grams, rounded to one decimal.
  pub fn nutrition_for_weight(&self, weight: f64) -> NutrientSet {
    self.per_100g().scaled(weight / 100.0).rounded()
  }

  /// Whether this queued product carries the given temp id.
  pub fn has_temp_id(&self, id: &RecordId) -> bool {
    matches!(id, RecordId::Local(temp) if self.temp_id.as_deref() == Some(temp.as_str()))
  }
}

/// Energy from macros: 4 kcal/g protein and carbs, 9 kcal/g fat.
pub fn calculate_calories(protein: f64, fat: f64, carbs: f64) -> f64 {
  ((protein * 4.0 + fat * 9.0 + carbs * 4.0) * 10.0).round() / 10.0
}

/// What an entry was eaten from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryProduct {
  /// A product from the catalog, by id (possibly a temp id).
  Catalog { product_id: RecordId },
  /// A product carried inline with the entry.
  Inline { product: Product },
}

impl EntryProduct {
  pub fn catalog(product_id: RecordId) -> Self {
    Self::Catalog { product_id }
  }

  pub fn product_id(&self) -> Option<&RecordId> {
    match self {
      Self::Catalog { product_id } => Some(product_id),
      Self::Inline { product } => product.id.as_ref(),
    }
  }
}

/// Diary record: a weight of some product eaten at a meal on a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<RecordId>,
  #[serde(flatten)]
  pub product: EntryProduct,
  pub meal_type: MealType,
  /// Grams
  pub weight: f64,
  pub date: NaiveDate,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub nutrition: Option<NutrientSet>,
  #[serde(rename = "_tempId", default, skip_serializing_if = "Option::is_none")]
  pub temp_id: Option<String>,
  #[serde(rename = "_offline", default, skip_serializing_if = "std::ops::Not::not")]
  pub offline: bool,
}

impl Entry {
  pub fn new(product: EntryProduct, meal_type: MealType, weight: f64, date: NaiveDate) -> Self {
    Self {
      id: None,
      product,
      meal_type,
      weight,
      date,
      nutrition: None,
      temp_id: None,
      offline: false,
    }
  }

  /// Build an entry for a known product, filling in nutrition for the weight.
  ///
  /// Products that have no id yet are carried inline.
  pub fn for_product(product: &Product, meal_type: MealType, weight: f64, date: NaiveDate) -> Self {
    let reference = match &product.id {
      Some(id) => EntryProduct::catalog(id.clone()),
      None => EntryProduct::Inline {
        product: product.clone(),
      },
    };
    Self {
      nutrition: Some(product.nutrition_for_weight(weight)),
      ..Self::new(reference, meal_type, weight, date)
    }
  }

  /// Whether this queued entry carries the given temp id.
  pub fn has_temp_id(&self, id: &RecordId) -> bool {
    matches!(id, RecordId::Local(temp) if self.temp_id.as_deref() == Some(temp.as_str()))
  }

  /// The integer `product_id` the batch sync endpoint needs. Inline products
  /// and products that only exist locally have none.
  pub fn server_product_id(&self) -> Option<i64> {
    match &self.product {
      EntryProduct::Catalog {
        product_id: RecordId::Server(id),
      } => Some(*id),
      _ => None,
    }
  }
}

/// Profile block of the sync payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  pub id: i64,
  pub username: String,
  #[serde(default)]
  pub weight: Option<f64>,
  #[serde(default)]
  pub is_setup_complete: bool,
}

fn default_goals() -> NutrientSet {
  DEFAULT_GOALS
}

/// Everything `GET /api/sync` returns for the signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
  #[serde(default)]
  pub user: Option<UserProfile>,
  #[serde(default)]
  pub products: Vec<Product>,
  /// Recipes are passed through untouched
  #[serde(default)]
  pub recipes: Vec<serde_json::Value>,
  #[serde(default = "default_goals")]
  pub goals: NutrientSet,
  /// Entries from the last 30 days
  #[serde(default)]
  pub entries: Vec<Entry>,
  #[serde(default)]
  pub meal_types: BTreeMap<String, String>,
}

impl Default for ServerState {
  fn default() -> Self {
    Self {
      user: None,
      products: Vec::new(),
      recipes: Vec::new(),
      goals: DEFAULT_GOALS,
      entries: Vec::new(),
      meal_types: BTreeMap::new(),
    }
  }
}

impl ServerState {
  pub fn find_product(&self, id: &RecordId) -> Option<&Product> {
    self.products.iter().find(|p| p.id.as_ref() == Some(id))
  }
}
