//! Resource management: repository, request handling and the operation
//! processor that applies accepted operations one resource at a time.

pub mod metrics;
pub mod processor;
pub mod repository;
pub mod service;

pub use processor::ResourceProcessor;
pub use repository::ResourceRepository;
pub use service::ResourceService;
