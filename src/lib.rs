pub mod features;
pub mod shared;

pub use features::billing::{
    BatchOrchestrator, BatchSummary, CycleProcessor, ExpenseClient, HttpExpenseClient,
    HttpNotificationClient, NotificationClient, ProcessingError,
};
pub use features::subscriptions::{Cadence, CreateSubscriptionDto, Subscription};
pub use shared::{
    AppError, AppResult, CorrelationContext, EnvironmentConfig, EventSink, ServiceConfig,
};
