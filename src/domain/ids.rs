//! Entity identifiers
//!
//! Every entity kind gets its own identifier type so a station id can never
//! be handed to an API that expects an EVSE id. All of them share one
//! representation: an issuer/country code, a suffix and a format tag.
//!
//! ```text
//! ISO:  DE*GEF*S1234      country = "DE",  suffix = "GEF*S1234"
//! DIN:  +49*822*S1234     country = "+49", suffix = "822*S1234"
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::error::IdentifierError;

/// Textual format an identifier was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdFormat {
    /// `DE*GEF*...` (alpha-2 country code)
    Iso,
    /// `+49*822*...` (telephone country code)
    Din,
}

/// Marker trait binding an identifier to one entity kind.
pub trait IdKind: Send + Sync + 'static {
    /// Human-readable kind name used in messages
    const NAME: &'static str;
}

macro_rules! id_kinds {
    ($($(#[$meta:meta])* $kind:ident => $name:literal as $alias:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $kind {}

            impl IdKind for $kind {
                const NAME: &'static str = $name;
            }

            $(#[$meta])*
            pub type $alias = Identifier<$kind>;
        )*
    };
}

id_kinds! {
    /// Charging station operator
    OperatorKind => "charging station operator" as OperatorId;
    /// Charging pool (site)
    PoolKind => "charging pool" as ChargingPoolId;
    /// Charging station (cabinet)
    StationKind => "charging station" as ChargingStationId;
    /// EVSE (individual connector)
    EvseKind => "EVSE" as EvseId;
    /// Charging tariff
    TariffKind => "charging tariff" as ChargingTariffId;
    /// Group of tariffs
    TariffGroupKind => "charging tariff group" as ChargingTariffGroupId;
    /// Group of charging stations
    StationGroupKind => "charging station group" as ChargingStationGroupId;
    /// Group of EVSEs
    EvseGroupKind => "EVSE group" as EvseGroupId;
    /// Parking operator
    ParkingOperatorKind => "parking operator" as ParkingOperatorId;
    /// Parking place
    ParkingPlaceKind => "parking place" as ParkingPlaceId;
}

/// Opaque, orderable identifier of one entity kind.
///
/// Equality, ordering and hashing ignore the case of the suffix and the
/// format tag.
pub struct Identifier<K: IdKind> {
    country: String,
    suffix: String,
    format: IdFormat,
    _kind: PhantomData<fn() -> K>,
}

impl<K: IdKind> Identifier<K> {
    pub fn new(
        country: impl Into<String>,
        suffix: impl Into<String>,
        format: IdFormat,
    ) -> Result<Self, IdentifierError> {
        let country = country.into().trim().to_uppercase();
        let suffix = suffix.into().trim().to_string();

        let country_ok = match format {
            IdFormat::Iso => {
                country.len() == 2 && country.chars().all(|c| c.is_ascii_alphabetic())
            }
            IdFormat::Din => {
                country.len() > 1
                    && country.starts_with('+')
                    && country[1..].chars().all(|c| c.is_ascii_digit())
            }
        };
        if !country_ok {
            return Err(IdentifierError::InvalidCountry {
                kind: K::NAME,
                value: country,
            });
        }

        if suffix.is_empty() {
            return Err(IdentifierError::EmptySuffix { kind: K::NAME });
        }
        if let Some(c) = suffix
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '*' | '-' | '_' | '.')))
        {
            return Err(IdentifierError::InvalidCharacter {
                kind: K::NAME,
                character: c,
            });
        }

        Ok(Self {
            country,
            suffix,
            format,
            _kind: PhantomData,
        })
    }

    /// Random ISO identifier below the given country code.
    pub fn random(country: &str) -> Result<Self, IdentifierError> {
        let suffix = Uuid::new_v4().simple().to_string()[..12].to_uppercase();
        Self::new(country, suffix, IdFormat::Iso)
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn format(&self) -> IdFormat {
        self.format
    }

    pub fn kind_name(&self) -> &'static str {
        K::NAME
    }

    fn normalized_suffix(&self) -> String {
        self.suffix.to_lowercase()
    }
}

impl<K: IdKind> Clone for Identifier<K> {
    fn clone(&self) -> Self {
        Self {
            country: self.country.clone(),
            suffix: self.suffix.clone(),
            format: self.format,
            _kind: PhantomData,
        }
    }
}

impl<K: IdKind> PartialEq for Identifier<K> {
    fn eq(&self, other: &Self) -> bool {
        self.country == other.country && self.suffix.eq_ignore_ascii_case(&other.suffix)
    }
}

impl<K: IdKind> Eq for Identifier<K> {}

impl<K: IdKind> Hash for Identifier<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.country.hash(state);
        self.normalized_suffix().hash(state);
    }
}

impl<K: IdKind> Ord for Identifier<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.country
            .cmp(&other.country)
            .then_with(|| self.normalized_suffix().cmp(&other.normalized_suffix()))
    }
}

impl<K: IdKind> PartialOrd for Identifier<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: IdKind> fmt::Display for Identifier<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}", self.country, self.suffix)
    }
}

impl<K: IdKind> fmt::Debug for Identifier<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", K::NAME, self)
    }
}

impl<K: IdKind> FromStr for Identifier<K> {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (country, suffix) = s.trim().split_once('*').ok_or_else(|| {
            IdentifierError::Malformed {
                kind: K::NAME,
                value: s.to_string(),
            }
        })?;
        let format = if country.starts_with('+') {
            IdFormat::Din
        } else {
            IdFormat::Iso
        };
        Self::new(country, suffix, format)
    }
}

impl<K: IdKind> Serialize for Identifier<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, K: IdKind> Deserialize<'de> for Identifier<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Tests ──────────────────────────────────────────────────────
