pub mod booking;
pub mod finance;
pub mod health;
pub mod webhook;
