pub mod approval;
pub mod mention;
pub mod reconciliation;
pub mod reminder;
pub mod verification;
