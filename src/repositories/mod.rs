pub(crate) mod activities;
pub(crate) mod exams;
pub(crate) mod questions;
pub(crate) mod sheets;
pub(crate) mod students;
