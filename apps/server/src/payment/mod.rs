//! Payment-provider integration: webhook verification, payment lookup,
//! metadata normalization and the confirmation processor.

pub mod confirmation;
pub mod gateway;
pub mod metadata;
pub mod notify;
pub mod signature;

pub use confirmation::ConfirmationProcessor;
pub use gateway::{MercadoPagoGateway, PaymentGateway};
pub use notify::{Notifier, TelegramNotifier, TracingNotifier};
