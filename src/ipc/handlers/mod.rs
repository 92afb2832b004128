pub mod backup;
pub mod billing;
pub mod commissions;
pub mod core;
pub mod instructors;
pub mod leads;
pub mod lesson_types;
pub mod messages;
pub mod products;
pub mod reports;
pub mod session;
pub mod setup;
pub mod students;
pub mod transactions;
