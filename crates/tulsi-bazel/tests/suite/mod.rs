mod support;

mod aspect_extraction;
mod extractor_cache;
mod path_info;
mod query_extraction;
