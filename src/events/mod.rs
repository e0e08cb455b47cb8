pub mod rejections;
pub mod timestamp;
pub mod track;
