//! The `cargo-vendor-bundle` binary

use std::process;

use cargo_vendor_bundle::cli;

fn main() {
    let opt = cli::parse_args();
    cli::init_logging(opt.log_level());

    match cli::vendor(opt) {
        Ok(bundle) => println!("{}", bundle.archive.display()),
        Err(err) => {
            tracing::error!("No vendor tarball produced: {:#}", err);
            process::exit(1);
        }
    }
}
