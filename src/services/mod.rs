pub mod inventory_service;
pub mod period_service;
pub mod reconciliation_service;
pub mod reversal_service;
pub mod transaction_service;
pub mod trial_balance_service;
pub mod void_service;
pub mod year_end_service;
