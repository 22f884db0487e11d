pub mod error_location;
pub mod secure_value;
