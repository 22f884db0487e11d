mod correlator;
mod process;
