pub mod breakpoint;
pub mod cdp;
pub mod config;
pub mod console;
pub mod dap;
pub mod error;
pub mod log;
pub mod pause;
pub mod server;
pub mod session;
pub mod sourcemap;

pub use error::Error;
