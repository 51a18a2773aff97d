pub mod booking;
pub mod conflict;
pub mod domain;
pub mod error;
pub mod ports;
pub mod recurrence;
pub mod reservation;
pub mod weekdays;

pub use booking::{BookingLifecycle, DeleteScope, StateChange};
pub use conflict::{find_conflicts, intersects, is_available, Conflict};
pub use domain::{
    BibId, Booking, BookingId, BookingState, HoldingId, Interval, ItemId, LoanId, Reservation, ReservationDetails,
    ReservationId,
};
pub use error::BookingError;
pub use ports::{BookingProvider, PortError, PortResult, ProviderError, ProviderResult, ReservationStore};
pub use recurrence::{generate, Recurrence};
pub use reservation::{
    end_of_day, AvailabilityRow, DeletionReport, NewReservation, ReservationService, SlotAvailability,
};
pub use weekdays::DayOfWeek;
