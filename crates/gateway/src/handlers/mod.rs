pub mod access;
pub mod auth;
pub mod dashboard;
pub mod grants;
pub mod records;
pub mod storage;
pub mod users;
