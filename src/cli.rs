//! Command line interface entry points and utilities

mod vendor;

use std::env;
use std::ffi::OsString;

use clap::Parser;

pub use self::vendor::{vendor, Toggle, VendorBundle, VendorOptions};
pub use crate::logging::{init as init_logging, LogLevel};

/// The argument cargo inserts when running the binary as `cargo vendor-bundle`
const CARGO_SUBCOMMAND: &str = "vendor-bundle";

pub fn parse_args() -> VendorOptions {
    VendorOptions::parse_from(strip_subcommand(env::args_os()))
}

fn strip_subcommand<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    args.into_iter()
        .enumerate()
        .filter(|(i, arg)| !(*i == 1 && arg == CARGO_SUBCOMMAND))
        .map(|(_, arg)| arg)
        .collect()
}
