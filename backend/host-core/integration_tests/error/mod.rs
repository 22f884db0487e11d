mod host;
mod spawn;
