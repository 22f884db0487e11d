mod error_location;
mod secure_value;
