pub mod clock;
pub mod error;
pub mod models;
pub mod recurrence;
pub mod snooze;
pub mod time_slots;
