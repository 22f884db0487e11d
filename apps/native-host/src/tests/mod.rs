mod driver;
mod error;
mod logger;
mod startup;
