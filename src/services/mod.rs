pub mod cleanup;
pub mod seat_lock;
