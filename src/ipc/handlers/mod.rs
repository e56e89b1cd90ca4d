pub mod backup_exchange;
pub mod core;
pub mod fees;
pub mod reports;
pub mod seed;
pub mod settings;
pub mod students;
