pub mod backup;
pub mod deletion;
pub mod files;
pub mod migrate;
pub mod sanitize;
pub mod transfer;
pub mod unzip;
