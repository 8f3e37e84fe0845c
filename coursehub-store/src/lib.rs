pub mod app_config;
pub mod bill_repo;
pub mod course_repo;
pub mod database;
pub mod enrollment_repo;
pub mod events;
pub mod redis_repo;
pub mod refund_repo;

pub use bill_repo::StoreBillRepository;
pub use course_repo::StoreCourseRepository;
pub use database::DbClient;
pub use enrollment_repo::StoreEnrollmentRepository;
pub use events::{EventProducer, KafkaNotifier};
pub use redis_repo::RedisClient;
pub use refund_repo::StoreRefundRepository;
