use anyhow::Result;

use yktool::cli::commands::run_cli;

fn main() -> Result<()> {
    run_cli()
}
