// Pipeline processing: parsing, normalization, matching, the panel and the index

pub mod index;
pub mod matcher;
pub mod normalize;
pub mod panel;
pub mod parser;
