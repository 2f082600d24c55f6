pub mod audit;
pub mod error;
pub mod session;
pub mod state;
pub mod ticket;
