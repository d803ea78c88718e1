//! planrun CLI binary
//!
//! Minimal entrypoint; all logic lives in the library. `cli::run()` handles
//! every bit of output including errors, and main only maps the exit code.

fn main() {
    if let Err(code) = planrun::cli::run() {
        std::process::exit(code.as_i32());
    }
}
