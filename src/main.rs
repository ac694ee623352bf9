//! llrpd binary entrypoint
// (c) 2025 the llrpd contributors

use std::process::ExitCode;

fn main() -> ExitCode {
    llrpd::main()
}
