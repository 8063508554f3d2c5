pub mod session;
pub mod transport;

pub use session::{
    HttpTransactionFetcher, PaymentSessionController, PaymentUiState, PaymentWatch,
    TransactionFetcher,
};
pub use transport::{RealtimeTransport, WsTransport};
