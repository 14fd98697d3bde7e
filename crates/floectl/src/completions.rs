use clap_complete::{generate, Shell};

use crate::cli;
use crate::errors::CliError;

pub(crate) fn completions(shell: &Shell) -> Result<(), CliError> {
    generate(
        *shell,
        &mut cli::build_cli(),
        "floectl",
        &mut std::io::stdout(),
    );
    Ok(())
}
