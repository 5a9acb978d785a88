use anyhow::{Context, Result};
use timelog::run_timelog;

fn main() -> Result<()> {
    let args_itr = std::env::args_os().skip(1);
    let exit_code = run_timelog(args_itr).context("timelog failed")?;
    std::process::exit(exit_code);
}
