pub mod difficulty;
pub mod pace;
pub mod priority;
pub mod retention;
pub mod shared;
