pub mod codes;
pub mod error;
pub mod provider;
pub mod providers;
pub mod signature;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::PaymentGateway;
pub use providers::jazzcash::{JazzCashClient, JazzCashConfig};
pub use signature::{SignatureCodec, SignedFieldSet};
pub use types::{
    CardCallback, CardInitiateRequest, CardRedirect, GatewayResult, PaymentMethod, PaymentStatus,
    WalletInitiateRequest,
};
