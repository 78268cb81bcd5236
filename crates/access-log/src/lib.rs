pub mod bucket;
pub mod failure;
pub mod geo;
pub mod output;
pub mod query;
pub mod record;
pub mod report;
pub mod settings;
pub mod window;
