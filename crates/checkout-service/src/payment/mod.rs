//! 支付网关

pub mod gateway;
pub mod mercado_pago;

pub use gateway::PaymentGateway;
pub use mercado_pago::MercadoPagoClient;

#[cfg(test)]
pub use gateway::MockPaymentGateway;
