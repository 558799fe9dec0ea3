pub mod model;

pub use model::{PaymentMethod, Transaction, TransactionStatus};
