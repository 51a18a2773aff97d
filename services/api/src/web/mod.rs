pub mod forms;
pub mod middleware;
pub mod rest;
pub mod state;

pub use middleware::require_staff;
pub use rest::{
    availability_handler, calendar_handler, change_state_handler, create_reservation_handler,
    delete_booking_handler, delete_reservation_handler, get_booking_handler, get_reservation_handler,
    user_bookings_handler,
};
