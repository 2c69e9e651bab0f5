pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod session;

pub use api::{HttpSeatLockApi, SeatHold, SeatLockApi};
pub use config::ClientConfig;
pub use controller::{BookingDetails, FlowStep, Notice, SeatToggle, SessionController};
pub use error::{ClientError, ClientResult};
pub use session::SessionContext;
