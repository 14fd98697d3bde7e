use crate::errors::CliError;

pub(crate) fn verification_config() -> Result<(), CliError> {
    print!("{}", artifact_client::default_policy_yaml());
    Ok(())
}
