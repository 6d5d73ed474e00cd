// SPDX-FileCopyrightText: 2021-2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

mod cli;

use clap::crate_name;
use cli_utils::{logging, BoxResult};
use monetometro::{
    portal::{Lookup, Portals},
    settings,
};
use tracing::instrument;
use tracing_subscriber::filter::LevelFilter;

#[allow(clippy::print_stdout)]
fn print_version_and_exit(quiet: bool) {
    if !quiet {
        print!("{} ", clap::crate_name!());
    }
    println!("{}", monetometro::VERSION);
    std::process::exit(0);
}

#[allow(clippy::print_stdout)]
fn print_json<T: serde::Serialize>(value: &T) -> BoxResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
#[instrument]
async fn main() -> BoxResult<()> {
    let log_reload_handle = logging::setup(crate_name!())?;
    let args = cli::args_matcher().get_matches();

    let quiet = args.get_flag(cli::A_L_QUIET);
    let version = args.get_flag(cli::A_L_VERSION);
    if version {
        print_version_and_exit(quiet);
    }

    let verbose = args.get_flag(cli::A_L_VERBOSE);

    let log_level = if verbose {
        LevelFilter::TRACE
    } else if quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };
    logging::set_log_level_tracing(&log_reload_handle, log_level)?;

    let email = args
        .get_one::<String>(cli::A_L_EMAIL)
        .cloned()
        .ok_or("No e-mail address given")?;

    let run_settings = settings::load()?;
    let cache = run_settings.open_cache().await?;
    let portals = Portals::new(run_settings.registry, cache, run_settings.max_age_days);
    let portal = portals.for_email(&email)?;

    if args.get_flag(cli::A_L_HEALTH) {
        let healthy = portal.health_check().await;
        tracing::info!("[{}] Cache is fresh: {healthy}", portal.domain());
        if !healthy {
            return Err(format!("Cached data of '{}' is stale or missing", portal.domain()).into());
        }
    } else if args.get_flag(cli::A_L_SUBDOMAINS) {
        print_json(&portal.list_subdomains().await?)?;
    } else {
        match portal.get_compensation(&email).await? {
            Lookup::Found(matches) => print_json(&matches)?,
            Lookup::Absent => {
                tracing::info!("Nobody matching '{email}' in the current data of '{}'.", portal.domain());
                if !quiet {
                    print_json(&Vec::<()>::new())?;
                }
            }
            Lookup::Incomplete(unresolved) => {
                return Err(format!(
                    "Nobody matching '{email}' in the current data of '{}', \
but {} organizations could not be resolved: {}",
                    portal.domain(),
                    unresolved.len(),
                    unresolved.join(", ")
                )
                .into());
            }
        }
    }

    Ok(())
}
