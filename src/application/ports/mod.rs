//! Ports to external collaborators

pub mod remote;
pub mod roaming;

pub use remote::{
    CancelReservationRequest, RemoteChargingDelegate, RemoteStartRequest, RemoteStopRequest,
    ReserveRequest, DEFAULT_RESERVATION_SECS,
};
pub use roaming::{AuthorizeStartRequest, AuthorizeStopRequest, RoamingNetwork};
