// SPDX-FileCopyrightText: 2021-2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use clap::{command, Arg, ArgAction, ArgGroup, Command, ValueHint};

pub const A_L_VERSION: &str = "version";
pub const A_S_VERSION: char = 'V';
pub const A_L_QUIET: &str = "quiet";
pub const A_S_QUIET: char = 'q';
pub const A_L_VERBOSE: &str = "verbose";
pub const A_S_VERBOSE: char = 'v';
pub const A_L_HEALTH: &str = "health";
pub const A_L_SUBDOMAINS: &str = "subdomains";
pub const A_L_EMAIL: &str = "email";

fn arg_version() -> Arg {
    Arg::new(A_L_VERSION)
        .help(concat!(
            "Print version information and exit. ",
            "May be combined with -",
            'q',
            ",--",
            "quiet",
            ", to really only output the version string."
        ))
        .short(A_S_VERSION)
        .long(A_L_VERSION)
        .action(ArgAction::SetTrue)
}

fn arg_quiet() -> Arg {
    Arg::new(A_L_QUIET)
        .help("Minimize or suppress output to stdout, and only log warnings and errors")
        .long_help("Minimize or suppress output to stdout, and only log warnings and errors.")
        .action(ArgAction::SetTrue)
        .short(A_S_QUIET)
        .long(A_L_QUIET)
        .conflicts_with(A_L_VERBOSE)
}

fn arg_verbose() -> Arg {
    Arg::new(A_L_VERBOSE)
        .help("More verbose log output")
        .long_help("More verbose log output; useful for debugging.")
        .action(ArgAction::SetTrue)
        .short(A_S_VERBOSE)
        .long(A_L_VERBOSE)
}

fn arg_health() -> Arg {
    Arg::new(A_L_HEALTH)
        .help("Only report whether the cached data of the portal is fresh")
        .long_help(
            "Only report whether the cached data of the portal responsible \
for the domain of EMAIL is fresh. \
Exits with a non-zero code if it is stale or missing.",
        )
        .action(ArgAction::SetTrue)
        .long(A_L_HEALTH)
}

fn arg_subdomains() -> Arg {
    Arg::new(A_L_SUBDOMAINS)
        .help("Only list the organization domains known for the portal, as JSON")
        .long_help(
            "Only list the organization domains of the portal responsible \
for the domain of EMAIL, with the number of records each, as JSON.",
        )
        .action(ArgAction::SetTrue)
        .long(A_L_SUBDOMAINS)
}

fn arg_email() -> Arg {
    Arg::new(A_L_EMAIL)
        .help("The e-mail address to look up, e.g. maria.silva@iema.es.gov.br")
        .value_name("EMAIL")
        .value_hint(ValueHint::EmailAddress)
        .num_args(1)
        .required_unless_present(A_L_VERSION)
}

#[must_use]
pub fn args_matcher() -> Command {
    command!()
        .about("Looks up the average monthly compensation of public servants by e-mail address")
        .bin_name(clap::crate_name!())
        .help_expected(true)
        .disable_version_flag(true)
        .arg(arg_version())
        .arg(arg_quiet())
        .arg(arg_verbose())
        .arg(arg_health())
        .arg(arg_subdomains())
        .group(ArgGroup::new("mode").args([A_L_HEALTH, A_L_SUBDOMAINS]))
        .arg(arg_email())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        args_matcher().debug_assert();
    }

    #[test]
    fn modes_are_exclusive() {
        let res = args_matcher().try_get_matches_from([
            "monetometro",
            "--health",
            "--subdomains",
            "a@es.gov.br",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn email_is_positional() {
        let matches = args_matcher()
            .try_get_matches_from(["monetometro", "-v", "maria.silva@es.gov.br"])
            .unwrap();
        assert_eq!(
            matches.get_one::<String>(A_L_EMAIL).map(String::as_str),
            Some("maria.silva@es.gov.br")
        );
        assert!(matches.get_flag(A_L_VERBOSE));
    }
}
