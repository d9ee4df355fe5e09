//! A small users-and-messages application used to exercise the provisioned
//! dependencies end to end.

pub mod complex;
pub mod model;
pub mod simple;

pub use complex::ComplexApp;
pub use model::{Message, User};
pub use simple::SimpleApp;
