//! Food diary API: domain types, wire envelopes and the remote gateway.

mod api_types;
mod client;
pub mod types;

pub use client::{HttpGateway, RemoteGateway};
pub use types::{
  Entry, EntryProduct, MealType, NutrientSet, Product, RecordId, ServerState, UserProfile,
};
