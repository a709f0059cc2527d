pub mod bitrefill_client;
pub mod client;
pub mod ui;
pub mod wizard;
