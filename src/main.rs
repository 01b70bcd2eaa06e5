use std::process;

fn main() {
    if let Err(err) = colstream::app::run() {
        eprintln!("fatal: {err:#}");
        process::exit(1);
    }
}
