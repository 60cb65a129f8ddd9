//! Serde envelopes matching the food diary API responses.
//!
//! These wrap the domain types so the gateway can unpack responses
//! without leaking envelope fields into the rest of the crate.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

use super::types::{Entry, NutrientSet, Product, ServerState};

/// `GET /api/sync`
#[derive(Debug, Deserialize)]
pub struct ApiSyncResponse {
  #[serde(default)]
  pub success: bool,
  pub data: Option<ServerState>,
  pub error: Option<String>,
}

impl ApiSyncResponse {
  /// Unpack the server state, treating `success: false` or a missing payload as failure.
  pub fn into_state(self) -> Result<ServerState> {
    if !self.success {
      return Err(eyre!(
        "Server reported sync failure: {}",
        self.error.as_deref().unwrap_or("no reason given")
      ));
    }
    self
      .data
      .ok_or_else(|| eyre!("Sync response is missing the data payload"))
  }
}

/// `POST /api/add_entry`
#[derive(Debug, Deserialize)]
pub struct ApiEntryResponse {
  pub entry: Entry,
}

/// `POST /api/add_product`
#[derive(Debug, Deserialize)]
pub struct ApiProductResponse {
  pub product: Product,
}

/// `GET /api/product/{id}?weight=`, either bare or wrapped in `nutrition`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiNutritionResponse {
  Wrapped { nutrition: NutrientSet },
  Bare(NutrientSet),
}

impl From<ApiNutritionResponse> for NutrientSet {
  fn from(response: ApiNutritionResponse) -> Self {
    match response {
      ApiNutritionResponse::Wrapped { nutrition } => nutrition,
      ApiNutritionResponse::Bare(nutrition) => nutrition,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::RecordId;
  use serde_json::json;

  #[test]
  fn test_sync_response_success() {
    let response: ApiSyncResponse = serde_json::from_value(json!({
      "success": true,
      "timestamp": "2024-03-01T10:00:00",
      "data": {
        "user": {"id": 1, "username": "anna", "weight": 61.5, "is_setup_complete": true},
        "products": [{"id": 4, "name": "Apple", "calories": 58.8, "protein": 0.3, "fat": 0.2, "carbs": 14}],
        "recipes": [],
        "goals": {"calories": 1800, "protein": 90, "fat": 60, "carbs": 220},
        "entries": [],
        "meal_types": {"breakfast": "Breakfast"}
      }
    }))
    .unwrap();

    let state = response.into_state().unwrap();
    assert_eq!(state.products.len(), 1);
    assert_eq!(state.products[0].id, Some(RecordId::Server(4)));
    assert_eq!(state.goals.calories, 1800.0);
    assert_eq!(state.user.map(|u| u.username), Some("anna".to_string()));
  }

  #[test]
  fn test_sync_response_failure_flag() {
    let response: ApiSyncResponse =
      serde_json::from_value(json!({"success": false, "error": "boom"})).unwrap();
    let err = response.into_state().unwrap_err();
    assert!(err.to_string().contains("boom"));
  }

  #[test]
  fn test_sync_response_missing_data() {
    let response: ApiSyncResponse = serde_json::from_value(json!({"success": true})).unwrap();
    assert!(response.into_state().is_err());
  }

  #[test]
  fn test_nutrition_response_shapes() {
    let bare: ApiNutritionResponse =
      serde_json::from_value(json!({"calories": 1, "protein": 2, "fat": 3, "carbs": 4})).unwrap();
    let wrapped: ApiNutritionResponse = serde_json::from_value(
      json!({"nutrition": {"calories": 1, "protein": 2, "fat": 3, "carbs": 4}}),
    )
    .unwrap();
    assert_eq!(NutrientSet::from(bare), NutrientSet::from(wrapped));
  }
}
