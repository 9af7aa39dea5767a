pub mod adder;

pub use adder::Adder;
