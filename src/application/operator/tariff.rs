//! Charging tariffs
//!
//! Tariffs are immutable values; changing one means swapping in a new
//! instance through the registry's compare-and-swap update.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::entity::Identifiable;
use crate::application::events::EntityKind;
use crate::domain::{ChargingTariffId, I18nString, TariffPricing};

#[derive(Debug, Clone, Serialize)]
pub struct ChargingTariff {
    id: ChargingTariffId,
    name: I18nString,
    description: I18nString,
    pricing: TariffPricing,
    created_at: DateTime<Utc>,
}

impl ChargingTariff {
    pub fn new(id: ChargingTariffId, name: I18nString, pricing: TariffPricing) -> Self {
        Self {
            id,
            name,
            description: I18nString::new(),
            pricing,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: I18nString) -> Self {
        self.description = description;
        self
    }

    /// Copy of this tariff with different pricing
    pub fn repriced(&self, pricing: TariffPricing) -> Self {
        Self {
            pricing,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &I18nString {
        &self.name
    }

    pub fn description(&self) -> &I18nString {
        &self.description
    }

    pub fn pricing(&self) -> &TariffPricing {
        &self.pricing
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Identifiable for ChargingTariff {
    type Id = ChargingTariffId;
    const KIND: EntityKind = EntityKind::ChargingTariff;

    fn id(&self) -> &ChargingTariffId {
        &self.id
    }
}
