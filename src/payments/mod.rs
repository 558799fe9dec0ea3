//! Payment provider integration.
//!
//! A unified capability interface over the two collection channels: the
//! push-confirmation provider and the redirect-checkout provider.

pub mod providers;
pub mod traits;
pub mod types;

pub use traits::PaymentProvider;
