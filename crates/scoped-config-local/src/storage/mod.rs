mod json;

pub use json::JsonFileStore;
