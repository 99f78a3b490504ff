pub mod assignments;
pub mod classes;
pub mod core;
pub mod queries;
pub mod subjects;
pub mod teachers;
