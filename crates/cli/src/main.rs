//! The main entrypoint for cli-onprem, which lives in the library crate.

fn run() -> anyhow::Result<()> {
    onprem_lib::cli::run_from_iter(std::env::args_os())
}

fn main() {
    onprem_utils::run_main(run)
}
