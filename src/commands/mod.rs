pub mod coordinator;
pub mod init;
pub mod task;
pub mod test_results;
pub mod worker;
