use chrono::Utc;
use mahayatra_booking::{Booking, CreateBookingRequest, Passenger};
use mahayatra_core::Bus;
use mahayatra_shared::Masked;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::api::SeatLockApi;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::session::SessionContext;

/// Where the user is in the booking flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    SelectingSeats,
    EnteringPassengerDetails,
    Submitting,
    Confirmed,
    Failed,
}

impl FlowStep {
    fn label(self) -> &'static str {
        match self {
            FlowStep::SelectingSeats => "selecting seats",
            FlowStep::EnteringPassengerDetails => "entering passenger details",
            FlowStep::Submitting => "submitting",
            FlowStep::Confirmed => "confirmed",
            FlowStep::Failed => "failed",
        }
    }
}

/// User-facing notifications raised by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A lock was refused; the seat map has been refreshed.
    SeatsUnavailable(Vec<String>),
    SeatLimitReached { limit: usize },
    /// The countdown crossed the warning threshold.
    HoldExpiring { remaining_seconds: u64 },
    /// The countdown reached zero and the selection was dropped.
    HoldsExpired(Vec<String>),
    /// Booking was refused because some holds had lapsed on the server.
    SelectionExpired(Vec<String>),
    LockFailed { seat: String, reason: String },
    BookingConfirmed { pnr: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatToggle {
    Selected,
    Deselected,
}

/// Passenger and contact details entered after seat selection.
#[derive(Debug, Clone)]
pub struct BookingDetails {
    pub passengers: Vec<Passenger>,
    pub contact_email: String,
    pub contact_phone: String,
}

struct FlowState {
    step: FlowStep,
    selected: Vec<String>,
    seat_map: Option<Bus>,
    deadline: Option<Instant>,
    countdown: Option<JoinHandle<()>>,
    /// The countdown ran out while a booking request was in flight.
    expired_while_submitting: bool,
    closed: bool,
}

impl FlowState {
    fn stop_countdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
        self.deadline = None;
    }
}

/// Everything the countdown task needs, cheap to clone.
#[derive(Clone)]
struct Shared {
    context: SessionContext,
    api: Arc<dyn SeatLockApi>,
    state: Arc<Mutex<FlowState>>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl Shared {
    fn notify(&self, notice: Notice) {
        if self.notices.send(notice).is_err() {
            debug!("Notice dropped, nobody is listening");
        }
    }

    async fn refresh(&self) {
        match self.api.fetch_bus(&self.context.bus_id).await {
            Ok(bus) => self.state.lock().await.seat_map = Some(bus),
            Err(e) => warn!("Failed to refresh seat map for bus {}: {}", self.context.bus_id, e),
        }
    }

    /// Unlock errors are logged and swallowed; server-side expiry reclaims the seats anyway.
    async fn release(&self, seats: &[String]) {
        if seats.is_empty() {
            return;
        }
        match self
            .api
            .unlock_seats(&self.context.bus_id, seats, &self.context.session_id)
            .await
        {
            Ok(released) => debug!("Released {:?} for {}", released, self.context.session_id),
            Err(e) => warn!("Failed to release seats {:?}: {}", seats, e),
        }
    }

    async fn expire(&self) {
        let seats = {
            let mut state = self.state.lock().await;
            state.countdown = None;
            state.deadline = None;
            match state.step {
                FlowStep::SelectingSeats | FlowStep::EnteringPassengerDetails | FlowStep::Failed => {}
                // Settled once the booking response arrives.
                FlowStep::Submitting => {
                    state.expired_while_submitting = true;
                    return;
                }
                FlowStep::Confirmed => return,
            }
            state.step = FlowStep::SelectingSeats;
            std::mem::take(&mut state.selected)
        };

        info!("Seat hold expired for {}: {:?}", self.context.session_id, seats);
        self.release(&seats).await;
        self.refresh().await;
        self.notify(Notice::HoldsExpired(seats));
    }

    async fn release_all(&self) {
        let seats = {
            let mut state = self.state.lock().await;
            state.stop_countdown();
            state.closed = true;
            std::mem::take(&mut state.selected)
        };
        self.release(&seats).await;
    }
}

async fn run_countdown(shared: Shared, hold: Duration, warning_after: Option<Duration>) {
    let mut elapsed = Duration::ZERO;
    if let Some(warning_after) = warning_after {
        sleep(warning_after).await;
        elapsed = warning_after;
        shared.notify(Notice::HoldExpiring {
            remaining_seconds: (hold - warning_after).as_secs(),
        });
    }
    sleep(hold - elapsed).await;
    shared.expire().await;
}

/// Drives one booking attempt from seat selection to confirmation.
///
/// Seats are locked one per toggle. Every grant resets a single countdown to
/// the hold duration; when it runs out the selection is dropped and the seat
/// map re-fetched. Leaving the flow, explicitly or by dropping the controller,
/// releases whatever is still held.
pub struct SessionController {
    shared: Shared,
    config: ClientConfig,
}

impl SessionController {
    /// Enters seat selection for `context.bus_id` and loads the seat map.
    pub async fn enter(
        context: SessionContext,
        config: ClientConfig,
        api: Arc<dyn SeatLockApi>,
    ) -> ClientResult<(Self, mpsc::UnboundedReceiver<Notice>)> {
        let bus = api.fetch_bus(&context.bus_id).await?;
        let (notices, receiver) = mpsc::unbounded_channel();
        info!("Entered seat selection on bus {} as {}", context.bus_id, context.session_id);

        let shared = Shared {
            context,
            api,
            state: Arc::new(Mutex::new(FlowState {
                step: FlowStep::SelectingSeats,
                selected: Vec::new(),
                seat_map: Some(bus),
                deadline: None,
                countdown: None,
                expired_while_submitting: false,
                closed: false,
            })),
            notices,
        };
        Ok((Self { shared, config }, receiver))
    }

    pub fn context(&self) -> &SessionContext {
        &self.shared.context
    }

    pub async fn step(&self) -> FlowStep {
        self.shared.state.lock().await.step
    }

    pub async fn selected_seats(&self) -> Vec<String> {
        self.shared.state.lock().await.selected.clone()
    }

    pub async fn seat_map(&self) -> Option<Bus> {
        self.shared.state.lock().await.seat_map.clone()
    }

    /// Time left on the hold countdown, if one is running.
    pub async fn remaining(&self) -> Option<Duration> {
        self.shared
            .state
            .lock()
            .await
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub async fn refresh(&self) {
        self.shared.refresh().await;
    }

    /// Selects or deselects one seat, locking or unlocking it on the server.
    pub async fn toggle_seat(&self, seat_number: &str) -> ClientResult<SeatToggle> {
        let deselect = {
            let mut state = self.shared.state.lock().await;
            if state.step != FlowStep::SelectingSeats {
                return Err(ClientError::InvalidStep(state.step.label()));
            }

            if let Some(pos) = state.selected.iter().position(|s| s == seat_number) {
                state.selected.remove(pos);
                if state.selected.is_empty() {
                    state.stop_countdown();
                }
                true
            } else {
                if state.selected.len() >= self.config.max_seats {
                    let limit = self.config.max_seats;
                    drop(state);
                    self.shared.notify(Notice::SeatLimitReached { limit });
                    return Err(ClientError::SeatLimitReached { limit });
                }
                if !self.locally_selectable(&state, seat_number) {
                    return Err(ClientError::SeatNotSelectable(seat_number.to_string()));
                }
                false
            }
        };

        let seats = vec![seat_number.to_string()];
        if deselect {
            self.shared.release(&seats).await;
            return Ok(SeatToggle::Deselected);
        }

        let context = &self.shared.context;
        match self
            .shared
            .api
            .lock_seats(&context.bus_id, &seats, &context.session_id)
            .await
        {
            Ok(hold) => {
                // The server's hold length wins over the configured fallback.
                let duration = match hold.hold_seconds {
                    0 => self.config.hold_duration(),
                    secs => Duration::from_secs(secs),
                };
                debug!("Hold on {} runs {:?} until {}", seat_number, duration, hold.expires_at);
                let mut state = self.shared.state.lock().await;
                if !state.selected.iter().any(|s| s == seat_number) {
                    state.selected.push(seat_number.to_string());
                }
                self.restart_countdown(&mut state, duration);
                Ok(SeatToggle::Selected)
            }
            Err(ClientError::SeatUnavailable(taken)) => {
                warn!("Seats taken on bus {}: {:?}", context.bus_id, taken);
                self.shared.refresh().await;
                self.shared.notify(Notice::SeatsUnavailable(taken.clone()));
                Err(ClientError::SeatUnavailable(taken))
            }
            Err(e) => {
                self.shared.notify(Notice::LockFailed {
                    seat: seat_number.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Rejects seats the last seat map shows as booked or held by another session.
    fn locally_selectable(&self, state: &FlowState, seat_number: &str) -> bool {
        let Some(seat) = state.seat_map.as_ref().and_then(|bus| bus.seat(seat_number)) else {
            return true;
        };
        seat.is_available_to(&self.shared.context.session_id, Utc::now())
    }

    fn restart_countdown(&self, state: &mut FlowState, hold: Duration) {
        state.stop_countdown();
        state.deadline = Some(Instant::now() + hold);
        state.countdown = Some(tokio::spawn(run_countdown(
            self.shared.clone(),
            hold,
            self.config.warning_after(hold),
        )));
    }

    /// Moves on to passenger details. Holds stay in place.
    pub async fn proceed(&self) -> ClientResult<()> {
        let mut state = self.shared.state.lock().await;
        if state.step != FlowStep::SelectingSeats {
            return Err(ClientError::InvalidStep(state.step.label()));
        }
        if state.selected.is_empty() {
            return Err(ClientError::NoSeatsSelected);
        }
        state.step = FlowStep::EnteringPassengerDetails;
        Ok(())
    }

    /// Back to seat selection from passenger details, or from a failed submit to retry it.
    pub async fn back(&self) -> ClientResult<()> {
        let mut state = self.shared.state.lock().await;
        state.step = match state.step {
            FlowStep::EnteringPassengerDetails => FlowStep::SelectingSeats,
            FlowStep::Failed => FlowStep::EnteringPassengerDetails,
            other => return Err(ClientError::InvalidStep(other.label())),
        };
        Ok(())
    }

    pub async fn submit(&self, details: BookingDetails) -> ClientResult<Booking> {
        {
            let mut state = self.shared.state.lock().await;
            if state.step != FlowStep::EnteringPassengerDetails {
                return Err(ClientError::InvalidStep(state.step.label()));
            }
            state.step = FlowStep::Submitting;
        }

        let request = CreateBookingRequest {
            bus_id: self.shared.context.bus_id.clone(),
            session_id: self.shared.context.session_id.clone(),
            passengers: details.passengers,
            contact_email: Masked::new(details.contact_email),
            contact_phone: Masked::new(details.contact_phone),
        };

        match self.shared.api.create_booking(&request).await {
            Ok(booking) => {
                {
                    let mut state = self.shared.state.lock().await;
                    state.stop_countdown();
                    state.selected.clear();
                    state.expired_while_submitting = false;
                    state.step = FlowStep::Confirmed;
                }
                info!("Booking {} confirmed for {}", booking.pnr, self.shared.context.session_id);
                self.shared.notify(Notice::BookingConfirmed {
                    pnr: booking.pnr.clone(),
                });
                Ok(booking)
            }
            Err(ClientError::HoldExpired(lapsed)) => {
                let still_held = {
                    let mut state = self.shared.state.lock().await;
                    state.stop_countdown();
                    state.expired_while_submitting = false;
                    state.step = FlowStep::SelectingSeats;
                    std::mem::take(&mut state.selected)
                };
                warn!("Booking refused, holds lapsed: {:?}", lapsed);
                self.shared.release(&still_held).await;
                self.shared.refresh().await;
                self.shared.notify(Notice::SelectionExpired(lapsed.clone()));
                Err(ClientError::HoldExpired(lapsed))
            }
            Err(e) => {
                let lapsed = {
                    let mut state = self.shared.state.lock().await;
                    state.step = FlowStep::Failed;
                    std::mem::take(&mut state.expired_while_submitting)
                };
                warn!("Booking submission failed: {}", e);
                if lapsed {
                    self.shared.expire().await;
                }
                Err(e)
            }
        }
    }

    /// Leaves the flow, releasing every seat still held.
    pub async fn leave(self) {
        self.shared.release_all().await;
        info!("Left seat selection as {}", self.shared.context.session_id);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Ok(state) = self.shared.state.try_lock() {
            if state.closed || (state.selected.is_empty() && state.countdown.is_none()) {
                return;
            }
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = self.shared.clone();
                runtime.spawn(async move { shared.release_all().await });
            }
            Err(_) => warn!(
                "Controller for {} dropped outside a runtime; holds will lapse on their own",
                self.shared.context.session_id
            ),
        }
    }
}
