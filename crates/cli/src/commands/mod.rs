pub mod doctor;
pub mod profile;
pub mod serve;
pub mod upload;
