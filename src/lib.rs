pub mod config;
pub mod domain;
pub mod error;
pub mod lock;
pub mod messaging;
pub mod partner;
pub mod service;
pub mod store;

pub use config::AppConfig;
pub use domain::{
    Approval, Decision, Expense, ExpenseApprovedEvent, ExpenseStatus, Role, APPROVAL_THRESHOLD,
    MAX_AMOUNT, MIN_AMOUNT,
};
pub use error::{ExpenseError, Result};
pub use lock::{LockGuard, LockStore, MemoryLockStore};
pub use messaging::{
    ChannelBroker, ChannelSender, ChannelSource, EventSender, ExpenseApprovedHandler,
    MessageHandler, MessageSource, OwnedMessage, RetryingConsumer,
};
pub use partner::{HttpPartner, PartnerPayment, PaymentPartner};
pub use service::{
    ApprovalService, CreateExpenseRequest, ExpenseService, Metrics, PaymentProcessor,
    SettlementProcessor,
};
pub use store::{ExpenseStore, MemoryStore, PostgresStore};
