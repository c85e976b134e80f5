pub mod seat_lock;

pub use seat_lock::{LockId, LockStatus, SeatLock, SeatLockRow};
