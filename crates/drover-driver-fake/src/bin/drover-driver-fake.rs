//! Plugin executable serving the `fake` driver.

use std::process::ExitCode;

fn main() -> ExitCode {
    drover_driver_fake::main_entry()
}
