pub mod payments;

pub use payments::{router, PaymentsState};
