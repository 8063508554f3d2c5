pub mod approval;
pub mod expiry;
pub mod gateway;
pub mod hub;
pub mod redis_store;
pub mod retry;
pub mod state_machine;
pub mod store;

pub use approval::{ApprovalOutcome, ApprovalService};
pub use expiry::ExpiryMonitor;
pub use gateway::{
    gateway_event_channel, run_callback_dispatcher, DirectSettlementGateway, GatewayEventSender,
    HttpPaymentGateway, PaymentGateway,
};
pub use hub::{ClientHandle, ConnectionState, HubStats, JoinOutcome, NotificationHub};
pub use redis_store::RedisTransactionStore;
pub use retry::RetryPolicy;
pub use store::{InMemoryTransactionStore, TransactionStore, TransactionStoreRef};
