pub mod classes;
pub mod core;
pub mod ids;
pub mod settings;
pub mod students;
