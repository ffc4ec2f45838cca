/// Installs the global `tracing` subscriber with console and rolling file output.
pub mod loggerlocal;
