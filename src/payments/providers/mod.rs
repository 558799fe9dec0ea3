//! Concrete provider adapters.

pub mod daraja;
pub mod paystack;

pub use daraja::DarajaProvider;
pub use paystack::PaystackProvider;
