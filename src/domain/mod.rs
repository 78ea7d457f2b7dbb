pub mod charging;
pub mod context;
pub mod error;
pub mod i18n;
pub mod ids;
pub mod results;
pub mod schedule;
pub mod status;
pub mod tariff;

// Re-export commonly used types
pub use charging::{
    AuthToken, AuthorizationInfo, AuthorizationStatus, CancelReservationReason,
    ChargingLocation, ChargingProduct, ChargingSession, ChargingSessionId, Reservation,
    ReservationHandling, ReservationId, ReservationLevel, ReservationStatus,
};
pub use context::{EventContext, EventTrackingId, UserId};
pub use error::{IdentifierError, RegistryError, RemoteError};
pub use i18n::I18nString;
pub use ids::{
    ChargingPoolId, ChargingStationGroupId, ChargingStationId, ChargingTariffGroupId,
    ChargingTariffId, EvseGroupId, EvseId, IdFormat, IdKind, Identifier, OperatorId,
    ParkingOperatorId, ParkingPlaceId,
};
pub use results::{CommandOutcome, CommandResult, DispatchResult, DispatchStatus};
pub use schedule::{ChangeMethod, InsertOutcome, StatusSchedule, DEFAULT_HISTORY_SIZE};
pub use status::{AdminStatus, OperationalStatus, Timestamped};
pub use tariff::{TariffPricing, TariffType};
