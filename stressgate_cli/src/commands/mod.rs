pub mod calibrate;
pub mod catalog;
pub mod gate;
pub mod sensitivity;
pub mod stress;
