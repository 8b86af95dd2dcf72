//! Plugin executable serving the `fakeserial` driver, a fake backend meant
//! to be dispatched one host at a time.

use std::process::ExitCode;

fn main() -> ExitCode {
    drover_driver_fake::main_entry()
}
