mod error;
mod hardware;
mod host;
mod transport;
