pub mod check;
pub mod mint;
pub mod open;
pub mod record;
pub mod scan;
