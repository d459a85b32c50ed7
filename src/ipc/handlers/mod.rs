pub mod core;
pub mod fee_types;
pub mod invoices;
pub mod quran;
pub mod settings;
pub mod students;
pub mod tracking;
