pub(crate) mod activity;
pub(crate) mod annotator;
pub(crate) mod document;
pub(crate) mod grading_delegate;
pub(crate) mod rubric;
pub(crate) mod storage;
pub(crate) mod store;
pub(crate) mod student_matcher;
pub(crate) mod text_extraction;
