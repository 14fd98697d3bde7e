use clap::{
    builder::PossibleValuesParser, crate_authors, crate_description, crate_name, crate_version,
    Arg, ArgAction, ArgGroup, Command,
};
use lazy_static::lazy_static;

lazy_static! {
    static ref VERSION_AND_SCHEMA: String = {
        format!(
            r#"{}

CompiledArtifacts schema version: {}
"#,
            crate_version!(),
            floe_compiler::COMPILED_ARTIFACTS_VERSION,
        )
    };
}

fn remote_args() -> Vec<Arg> {
    vec![
        Arg::new("docker-config-json-path")
            .long("docker-config-json-path")
            .value_name("PATH")
            .help("Path to a Docker 'config.json' file holding registry credentials"),
        Arg::new("sources-path")
            .long("sources-path")
            .value_name("PATH")
            .help("YAML file holding source information (insecure registries, custom CA's...)"),
    ]
}

fn subcommand_compile() -> Command {
    let mut args = remote_args();
    args.push(
        Arg::new("env")
            .long("env")
            .value_name("NAME")
            .help("Environment the compile is run for. Compilation output never depends on it"),
    );
    args.push(
        Arg::new("output")
            .long("output")
            .short('o')
            .value_name("PATH")
            .help("Where to write the CompiledArtifacts JSON [default: target/compiled-artifacts.json]"),
    );
    args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    args.push(
        Arg::new("manifest-dir")
            .required(true)
            .index(1)
            .help("Directory holding the DataProduct manifest"),
    );

    Command::new("compile")
        .about("Compile a data product and its inheritance chain into CompiledArtifacts")
        .args(args)
}

fn subcommand_artifact() -> Command {
    let mut push_args = remote_args();
    push_args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    push_args.push(
        Arg::new("path")
            .required(true)
            .index(1)
            .help("CompiledArtifacts JSON file to push"),
    );
    push_args.push(
        Arg::new("uri")
            .required(true)
            .index(2)
            .help("Artifact URI. Supported scheme: oci://"),
    );

    let mut pull_args = remote_args();
    pull_args.push(
        Arg::new("environment")
            .long("environment")
            .short('e')
            .value_name("NAME")
            .env("FLOE_ENV")
            .help("Environment whose verification enforcement applies"),
    );
    pull_args.push(
        Arg::new("policy")
            .long("policy")
            .value_name("PATH")
            .help("Verification policy file. Defaults to the user configuration directory"),
    );
    pull_args.push(
        Arg::new("output")
            .long("output")
            .short('o')
            .value_name("PATH")
            .help("Output file. If not provided the artifact is written to stdout"),
    );
    pull_args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    pull_args.push(
        Arg::new("uri")
            .required(true)
            .index(1)
            .help("Artifact URI. Supported scheme: oci://"),
    );

    let mut list_args = remote_args();
    list_args.push(
        Arg::new("limit")
            .long("limit")
            .value_name("N")
            .help("Maximum number of revisions to return"),
    );
    list_args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    list_args.push(
        Arg::new("repository")
            .required(true)
            .index(1)
            .help("Repository to enumerate, e.g. registry.acme.dev/floe/orders"),
    );

    let mut rm_args = remote_args();
    rm_args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    rm_args.push(
        Arg::new("uri")
            .required(true)
            .index(1)
            .help("Artifact URI to remove"),
    );

    let mut sign_args = remote_args();
    sign_args.push(
        Arg::new("keyless")
            .long("keyless")
            .action(ArgAction::SetTrue)
            .help("Sign with an ephemeral certificate bound to an OIDC identity"),
    );
    sign_args.push(
        Arg::new("key")
            .long("key")
            .value_name("SECRET")
            .help("Sign with a long-lived key resolved from this env secret name"),
    );
    sign_args.push(
        Arg::new("rekor")
            .long("rekor")
            .action(ArgAction::SetTrue)
            .help("Record key-based signatures in the transparency log as well"),
    );
    sign_args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    sign_args.push(
        Arg::new("uri")
            .required(true)
            .index(1)
            .help("Artifact URI to sign"),
    );

    let mut verify_args = remote_args();
    verify_args.push(
        Arg::new("environment")
            .long("environment")
            .short('e')
            .value_name("NAME")
            .env("FLOE_ENV")
            .help("Environment whose verification enforcement applies"),
    );
    verify_args.push(
        Arg::new("policy")
            .long("policy")
            .value_name("PATH")
            .help("Verification policy file"),
    );
    verify_args.push(
        Arg::new("bundle")
            .long("bundle")
            .value_name("PATH")
            .help("Verify against an offline bundle instead of the registry"),
    );
    verify_args.push(
        Arg::new("export-bundle")
            .long("export-bundle")
            .value_name("PATH")
            .help("Write an offline verification bundle for air-gapped sites"),
    );
    verify_args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    verify_args.push(
        Arg::new("uri")
            .required(true)
            .index(1)
            .help("Artifact URI to verify"),
    );

    let mut inspect_args = remote_args();
    inspect_args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    inspect_args.push(
        Arg::new("uri")
            .required(true)
            .index(1)
            .help("Artifact URI to inspect"),
    );

    let mut subcommands = vec![
        Command::new("push")
            .about("Push CompiledArtifacts to an OCI registry")
            .args(push_args),
        Command::new("pull")
            .about("Pull CompiledArtifacts, applying the verification policy")
            .args(pull_args),
        Command::new("list")
            .about("List artifact revisions in a repository")
            .args(list_args),
        Command::new("rm")
            .about("Remove an artifact revision from the registry (best effort)")
            .args(rm_args),
        Command::new("sign")
            .about("Sign an artifact with Sigstore")
            .args(sign_args)
            .group(
                ArgGroup::new("signing-mode")
                    .args(["keyless", "key"])
                    .required(true),
            ),
        Command::new("verify")
            .about("Verify an artifact signature against a policy")
            .args(verify_args),
        Command::new("inspect")
            .about("Show identity, inheritance chain and signature state")
            .args(inspect_args),
    ];
    subcommands.sort_by(|a, b| a.get_name().cmp(b.get_name()));

    Command::new("artifact")
        .about("Manage CompiledArtifacts on OCI registries")
        .subcommand_required(true)
        .subcommands(subcommands)
}

fn subcommand_network() -> Command {
    let mut generate_args = remote_args();
    generate_args.push(
        Arg::new("output-dir")
            .long("output-dir")
            .short('o')
            .value_name("DIR")
            .help("Directory for the generated YAML [default: target/network]"),
    );
    generate_args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    generate_args.push(
        Arg::new("manifest-dir")
            .required(true)
            .index(1)
            .help("Directory holding the DataProduct manifest"),
    );

    let mut validate_args = remote_args();
    validate_args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    validate_args.push(
        Arg::new("manifest-dir")
            .required(true)
            .index(1)
            .help("Directory holding the DataProduct manifest"),
    );

    let mut subcommands = vec![
        Command::new("generate")
            .about("Generate NetworkPolicies, namespaces and RBAC manifests")
            .args(generate_args),
        Command::new("validate")
            .about("Dry-run the generated manifests against their invariants")
            .args(validate_args),
    ];
    subcommands.sort_by(|a, b| a.get_name().cmp(b.get_name()));

    Command::new("network")
        .about("Derive Kubernetes network and security manifests")
        .subcommand_required(true)
        .subcommands(subcommands)
}

fn subcommand_scaffold() -> Command {
    Command::new("scaffold")
        .about("Scaffold a configuration file")
        .subcommand_required(true)
        .subcommand(
            Command::new("verification-config")
                .about("Output a default signature verification policy"),
        )
}

pub fn build_cli() -> Command {
    let mut subcommands = vec![
        subcommand_compile(),
        subcommand_artifact(),
        subcommand_network(),
        subcommand_scaffold(),
        Command::new("completions")
            .about("Generate shell completions")
            .arg(
                Arg::new("shell")
                    .long("shell")
                    .short('s')
                    .value_name("VALUE")
                    .required(true)
                    .value_parser(PossibleValuesParser::new([
                        "bash", "elvish", "fish", "powershell", "zsh",
                    ]))
                    .help("Shell type"),
            ),
    ];
    subcommands.sort_by(|a, b| a.get_name().cmp(b.get_name()));

    Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Increase verbosity"),
        )
        .subcommands(subcommands)
        .long_version(VERSION_AND_SCHEMA.as_str())
        .subcommand_required(true)
        .arg_required_else_help(true)
}
