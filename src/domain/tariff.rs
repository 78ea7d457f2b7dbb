//! Tariff pricing
//!
//! Prices are kept as [`Decimal`] major currency units so estimates never
//! lose cents to float rounding.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which price components a tariff bills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TariffType {
    /// Flat rate per kWh
    #[default]
    PerKwh,
    /// Flat rate per minute
    PerMinute,
    /// Flat fee per session
    PerSession,
    /// Per kWh + per minute + session fee
    Combined,
}

impl std::fmt::Display for TariffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerKwh => write!(f, "PerKwh"),
            Self::PerMinute => write!(f, "PerMinute"),
            Self::PerSession => write!(f, "PerSession"),
            Self::Combined => write!(f, "Combined"),
        }
    }
}

/// Price elements of a charging tariff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffPricing {
    pub tariff_type: TariffType,
    /// ISO 4217 currency code
    pub currency: String,
    pub price_per_kwh: Decimal,
    pub price_per_minute: Decimal,
    pub session_fee: Decimal,
    pub min_fee: Decimal,
    /// Zero means no cap
    pub max_fee: Decimal,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl TariffPricing {
    pub fn per_kwh(currency: impl Into<String>, price_per_kwh: Decimal) -> Self {
        Self {
            tariff_type: TariffType::PerKwh,
            currency: currency.into(),
            price_per_kwh,
            price_per_minute: Decimal::ZERO,
            session_fee: Decimal::ZERO,
            min_fee: Decimal::ZERO,
            max_fee: Decimal::ZERO,
            valid_from: None,
            valid_until: None,
        }
    }

    /// Estimated price of a session, clamped to min/max fee
    pub fn estimate(&self, energy_wh: u64, duration_seconds: u64) -> Decimal {
        let energy_kwh = Decimal::from(energy_wh) / Decimal::from(1000);
        let minutes = Decimal::from(duration_seconds) / Decimal::from(60);

        let energy_cost = energy_kwh * self.price_per_kwh;
        let time_cost = minutes * self.price_per_minute;

        let subtotal = match self.tariff_type {
            TariffType::PerKwh => energy_cost,
            TariffType::PerMinute => time_cost,
            TariffType::PerSession => self.session_fee,
            TariffType::Combined => energy_cost + time_cost + self.session_fee,
        };

        let total = subtotal.max(self.min_fee);
        let total = if self.max_fee > Decimal::ZERO {
            total.min(self.max_fee)
        } else {
            total
        };
        total.round_dp(2)
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| at >= from)
            && self.valid_until.map_or(true, |until| at <= until)
    }
}

// ── Tests ──────────────────────────────────────────────────────
