pub mod counter;
pub mod generator;
pub mod interpreter;

pub use counter::{decode_counter, Counter};
pub use generator::{ApfGenerator, Label, Register};
pub use interpreter::Verdict;
